use crate::error::{Error, Result};
use crate::value::Value;
use half::f16;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Byte permutation inside one 16-bit register chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// High byte first (`">"`).
    #[default]
    Big,
    /// Low byte first (`"<"`).
    Little,
}

/// Order of consecutive register chunks forming a value wider than one
/// register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordOrder {
    /// Most-significant register first (`">"`).
    #[default]
    Big,
    /// Least-significant register first (`"<"`).
    Little,
}

impl ByteOrder {
    pub fn symbol(self) -> &'static str {
        match self {
            ByteOrder::Big => ">",
            ByteOrder::Little => "<",
        }
    }
}

impl WordOrder {
    pub fn symbol(self) -> &'static str {
        match self {
            WordOrder::Big => ">",
            WordOrder::Little => "<",
        }
    }
}

impl FromStr for ByteOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(ByteOrder::Big),
            "<" => Ok(ByteOrder::Little),
            _ => Err(Error::Encoding(format!("unknown byte order: {s:?}"))),
        }
    }
}

impl FromStr for WordOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" => Ok(WordOrder::Big),
            "<" => Ok(WordOrder::Little),
            _ => Err(Error::Encoding(format!("unknown word order: {s:?}"))),
        }
    }
}

/// Type tag of a number variable. 8-bit tags are deliberately absent; a
/// register is the smallest addressable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F16,
    F32,
    F64,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::U16 => "u16",
            Tag::I16 => "i16",
            Tag::U32 => "u32",
            Tag::I32 => "i32",
            Tag::U64 => "u64",
            Tag::I64 => "i64",
            Tag::F16 => "f16",
            Tag::F32 => "f32",
            Tag::F64 => "f64",
        }
    }

    /// Width in bytes on the wire.
    pub fn bytes(self) -> usize {
        match self {
            Tag::U16 | Tag::I16 | Tag::F16 => 2,
            Tag::U32 | Tag::I32 | Tag::F32 => 4,
            Tag::U64 | Tag::I64 | Tag::F64 => 8,
        }
    }

    /// Width in 16-bit registers.
    pub fn registers(self) -> u16 {
        (self.bytes() / 2) as u16
    }

    pub fn is_float(self) -> bool {
        matches!(self, Tag::F16 | Tag::F32 | Tag::F64)
    }

    fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Tag::U16 => Some((0, u16::MAX as i128)),
            Tag::I16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Tag::U32 => Some((0, u32::MAX as i128)),
            Tag::I32 => Some((i32::MIN as i128, i32::MAX as i128)),
            Tag::U64 => Some((0, u64::MAX as i128)),
            Tag::I64 => Some((i64::MIN as i128, i64::MAX as i128)),
            _ => None,
        }
    }
}

impl FromStr for Tag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "u16" => Ok(Tag::U16),
            "i16" => Ok(Tag::I16),
            "u32" => Ok(Tag::U32),
            "i32" => Ok(Tag::I32),
            "u64" => Ok(Tag::U64),
            "i64" => Ok(Tag::I64),
            "f16" => Ok(Tag::F16),
            "f32" => Ok(Tag::F32),
            "f64" => Ok(Tag::F64),
            _ => Err(Error::UnknownType(s.to_owned())),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One field of a packed bit-field record, at most 16 bits wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: String,
    width: u8,
    signed: bool,
}

impl Field {
    /// Parse a field from its `u<k>`/`s<k>` format string, `1 <= k <= 16`.
    pub fn new(name: impl Into<String>, format: &str) -> Result<Self> {
        let (signed, digits) = match format.split_at_checked(1) {
            Some(("u", digits)) => (false, digits),
            Some(("s", digits)) => (true, digits),
            _ => return Err(Error::UnknownType(format.to_owned())),
        };
        let width: u8 = digits
            .parse()
            .map_err(|_| Error::UnknownType(format.to_owned()))?;
        if !(1..=16).contains(&width) {
            return Err(Error::UnknownType(format.to_owned()));
        }
        Ok(Field {
            name: name.into(),
            width,
            signed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn format(&self) -> String {
        format!("{}{}", if self.signed { "s" } else { "u" }, self.width)
    }

    fn range(&self) -> (i32, i32) {
        if self.signed {
            (-(1 << (self.width - 1)), (1 << (self.width - 1)) - 1)
        } else {
            (0, (1i32 << self.width) - 1)
        }
    }
}

/// Streaming encoder producing one 2-byte chunk per register.
///
/// Byteorder governs the two bytes inside a chunk, wordorder the order of
/// the chunks making up one multi-register value. Strings are a byte per
/// character and ignore both.
#[derive(Debug)]
pub struct PayloadBuilder {
    chunks: SmallVec<[[u8; 2]; 4]>,
    byteorder: ByteOrder,
    wordorder: WordOrder,
}

impl PayloadBuilder {
    pub fn new(byteorder: ByteOrder, wordorder: WordOrder) -> Self {
        PayloadBuilder {
            chunks: SmallVec::new(),
            byteorder,
            wordorder,
        }
    }

    /// Append one number. Integer tags are range-checked, float tags are
    /// not.
    pub fn add_number(&mut self, tag: Tag, value: &Value) -> Result<()> {
        if tag.is_float() {
            let v = value.as_f64().ok_or_else(|| {
                Error::Encoding(format!("expected a numeric value for {tag}, got {value:?}"))
            })?;
            match tag {
                Tag::F16 => self.push_value(&f16::from_f64(v).to_be_bytes()),
                Tag::F32 => self.push_value(&(v as f32).to_be_bytes()),
                _ => self.push_value(&v.to_be_bytes()),
            }
            return Ok(());
        }
        let v = match value {
            Value::Int(v) => *v as i128,
            Value::UInt(v) => *v as i128,
            _ => {
                return Err(Error::Encoding(format!(
                    "expected an integer value for {tag}, got {value:?}"
                )));
            }
        };
        let (min, max) = tag.int_range().unwrap_or((0, 0));
        if v < min || v > max {
            return Err(Error::OutOfBounds {
                ty: tag.name().to_owned(),
                value: v.to_string(),
            });
        }
        let raw = (v as u64).to_be_bytes();
        self.push_value(&raw[8 - tag.bytes()..]);
        Ok(())
    }

    /// Append an ASCII string, right-padded with `0x20` up to `length`
    /// bytes (and up to the enclosing register boundary).
    pub fn add_string(&mut self, length: usize, s: &str) -> Result<()> {
        if !s.is_ascii() {
            return Err(Error::Encoding(format!("string {s:?} is not ASCII")));
        }
        if s.len() > length {
            return Err(Error::Encoding(format!(
                "string {s:?} does not fit into {length} bytes"
            )));
        }
        let mut bytes = s.as_bytes().to_vec();
        bytes.resize(length.div_ceil(2) * 2, 0x20);
        for pair in bytes.chunks_exact(2) {
            self.chunks.push([pair[0], pair[1]]);
        }
        Ok(())
    }

    /// Pack `fields` MSB-first into exactly one register; the remaining
    /// high bits stay zero.
    pub fn add_record(&mut self, fields: &[Field], values: &HashMap<String, i32>) -> Result<()> {
        let total: u32 = fields.iter().map(|f| f.width as u32).sum();
        if total > 16 {
            return Err(Error::Encoding(format!(
                "record fields are {total} bits wide, at most 16 are available"
            )));
        }
        let mut word: u16 = 0;
        let mut shift: u32 = total;
        for field in fields {
            let v = *values.get(&field.name).ok_or_else(|| {
                Error::Encoding(format!("missing value for record field '{}'", field.name))
            })?;
            let (min, max) = field.range();
            if v < min || v > max {
                return Err(Error::OutOfBounds {
                    ty: field.format(),
                    value: v.to_string(),
                });
            }
            let mask = (1u32 << field.width) - 1;
            shift -= field.width as u32;
            word |= ((v as u32 & mask) << shift) as u16;
        }
        self.push_value(&word.to_be_bytes());
        Ok(())
    }

    /// The ordered 2-byte chunks, one per register.
    pub fn build(self) -> Vec<[u8; 2]> {
        self.chunks.into_vec()
    }

    // `be` holds one value in big-endian byte order, an even number of
    // bytes long.
    fn push_value(&mut self, be: &[u8]) {
        let mut words: SmallVec<[[u8; 2]; 4]> =
            be.chunks_exact(2).map(|p| [p[0], p[1]]).collect();
        if self.wordorder == WordOrder::Little {
            words.reverse();
        }
        for word in words {
            self.chunks.push(match self.byteorder {
                ByteOrder::Big => word,
                ByteOrder::Little => [word[1], word[0]],
            });
        }
    }
}

/// The exact inverse of [`PayloadBuilder`], reading from a flat byte
/// buffer.
#[derive(Debug)]
pub struct PayloadDecoder<'a> {
    buf: &'a [u8],
    offset: usize,
    byteorder: ByteOrder,
    wordorder: WordOrder,
}

impl<'a> PayloadDecoder<'a> {
    pub fn new(buf: &'a [u8], byteorder: ByteOrder, wordorder: WordOrder) -> Self {
        PayloadDecoder {
            buf,
            offset: 0,
            byteorder,
            wordorder,
        }
    }

    pub fn decode_number(&mut self, tag: Tag) -> Result<Value> {
        let be = self.take_value(tag.bytes())?;
        let raw = be.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
        Ok(match tag {
            Tag::U16 | Tag::U32 | Tag::U64 => Value::UInt(raw),
            Tag::I16 => Value::Int((raw as u16 as i16).into()),
            Tag::I32 => Value::Int((raw as u32 as i32).into()),
            Tag::I64 => Value::Int(raw as i64),
            Tag::F16 => Value::Float(f16::from_bits(raw as u16).to_f64()),
            Tag::F32 => Value::Float(f32::from_bits(raw as u32).into()),
            Tag::F64 => Value::Float(f64::from_bits(raw)),
        })
    }

    /// Read a `length`-byte ASCII string. Trailing `0x20` padding is kept;
    /// callers trim if they want to.
    pub fn decode_string(&mut self, length: usize) -> Result<Value> {
        let stored = length.div_ceil(2) * 2;
        let bytes = self.take_raw(stored)?;
        let s = std::str::from_utf8(&bytes[..length])
            .map_err(|_| Error::Encoding(format!("string payload is not valid ASCII: {bytes:?}")))?;
        Ok(Value::Str(s.to_owned()))
    }

    /// Unpack one register into its MSB-first fields, sign-extending
    /// `s<k>` fields.
    pub fn decode_record(&mut self, fields: &[Field]) -> Result<Value> {
        let be = self.take_value(2)?;
        let word = u16::from_be_bytes([be[0], be[1]]);
        let mut values = HashMap::new();
        let mut shift: u32 = fields.iter().map(|f| f.width as u32).sum();
        for field in fields {
            let mask = (1u32 << field.width) - 1;
            shift -= field.width as u32;
            let raw = (word as u32 >> shift) & mask;
            let v = if field.signed && raw & (1 << (field.width - 1)) != 0 {
                raw as i32 - (1i32 << field.width)
            } else {
                raw as i32
            };
            values.insert(field.name.clone(), v);
        }
        Ok(Value::Record(values))
    }

    // Consume `n` bytes and undo the byte/word permutation, yielding one
    // value in big-endian order.
    fn take_value(&mut self, n: usize) -> Result<SmallVec<[u8; 8]>> {
        let raw = self.take_raw(n)?;
        let mut words: SmallVec<[[u8; 2]; 4]> = raw
            .chunks_exact(2)
            .map(|p| match self.byteorder {
                ByteOrder::Big => [p[0], p[1]],
                ByteOrder::Little => [p[1], p[0]],
            })
            .collect();
        if self.wordorder == WordOrder::Little {
            words.reverse();
        }
        Ok(words.into_iter().flatten().collect())
    }

    fn take_raw(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.offset < n {
            return Err(Error::Encoding(format!(
                "payload exhausted: needed {n} bytes at offset {}, have {}",
                self.offset,
                self.buf.len() - self.offset
            )));
        }
        let slice = &self.buf[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }
}
