use crate::codec::{ByteOrder, Field, PayloadBuilder, PayloadDecoder, Tag, WordOrder};
use crate::error::{Error, Result};
use crate::value::{Value, Values};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a register variable stores.
#[derive(Debug, Clone, PartialEq)]
pub enum Kind {
    Number(Tag),
    Str { length: usize },
    Record(Vec<Field>),
}

/// A declared register variable, not yet placed into a layout.
///
/// An explicit address is optional; the layout places addressless
/// variables directly behind their predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    name: String,
    kind: Kind,
    address: Option<u16>,
}

impl Variable {
    /// A number variable. The type is given in its text form (`"i32"`,
    /// `"f16"`, ...) and rejected with [`Error::UnknownType`] if it is not
    /// a supported 16/32/64-bit tag.
    pub fn number(
        name: impl Into<String>,
        ty: &str,
        address: impl Into<Option<i64>>,
    ) -> Result<Self> {
        let tag: Tag = ty.parse()?;
        Self::new(name.into(), Kind::Number(tag), address.into())
    }

    /// A fixed-length ASCII string variable occupying `length` bytes.
    pub fn string(
        name: impl Into<String>,
        length: usize,
        address: impl Into<Option<i64>>,
    ) -> Result<Self> {
        let name = name.into();
        if length == 0 {
            return Err(Error::InvalidSize { name, size: 0 });
        }
        Self::new(name, Kind::Str { length }, address.into())
    }

    /// A packed bit-field record occupying one register. Field widths must
    /// sum to at most 16 bits.
    pub fn record(
        name: impl Into<String>,
        fields: Vec<Field>,
        address: impl Into<Option<i64>>,
    ) -> Result<Self> {
        let total: u32 = fields.iter().map(|f| u32::from(f.width())).sum();
        if total > 16 {
            return Err(Error::Encoding(format!(
                "record fields are {total} bits wide, at most 16 are available"
            )));
        }
        Self::new(name.into(), Kind::Record(fields), address.into())
    }

    fn new(name: String, kind: Kind, address: Option<i64>) -> Result<Self> {
        let address = match address {
            None => None,
            Some(a) if a < 0 => return Err(Error::NegativeAddress { name, address: a }),
            Some(a) => Some(u16::try_from(a).map_err(|_| {
                Error::Encoding(format!(
                    "address {a} of variable '{name}' exceeds the 16-bit address space"
                ))
            })?),
        };
        Ok(Variable {
            name,
            kind,
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in registers.
    pub fn size(&self) -> u16 {
        match &self.kind {
            Kind::Number(tag) => tag.registers(),
            Kind::Str { length } => length.div_ceil(2) as u16,
            Kind::Record(_) => 1,
        }
    }
}

// A variable after placement.
#[derive(Debug, Clone, PartialEq)]
struct Slot {
    name: String,
    kind: Kind,
    address: u16,
    size: u16,
}

impl Slot {
    fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.size)
    }
}

/// One contiguous write region, targeting a single wire transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub address: u16,
    pub bytes: Vec<u8>,
}

impl Chunk {
    /// The chunk as big-endian register words (`high * 256 + low`), the
    /// form the datastore and the wire expect.
    pub fn words(&self) -> Vec<u16> {
        self.bytes
            .chunks_exact(2)
            .map(|p| u16::from(p[0]) << 8 | u16::from(p[1]))
            .collect()
    }
}

/// An immutable, address-ordered collection of register variables with a
/// fixed byte and word order.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterLayout {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    byteorder: ByteOrder,
    wordorder: WordOrder,
    address: u16,
    end: u32,
}

impl RegisterLayout {
    /// Build a layout with the default big/big orders.
    pub fn new(variables: Vec<Variable>) -> Result<Self> {
        Self::with_orders(variables, ByteOrder::default(), WordOrder::default())
    }

    pub fn with_orders(
        variables: Vec<Variable>,
        byteorder: ByteOrder,
        wordorder: WordOrder,
    ) -> Result<Self> {
        if variables.is_empty() {
            return Err(Error::NoVariables);
        }
        let mut slots: Vec<Slot> = Vec::with_capacity(variables.len());
        let mut index = HashMap::with_capacity(variables.len());
        for var in variables {
            let size = var.size();
            let previous_end = slots.last().map(Slot::end).unwrap_or(0);
            let address = match var.address {
                Some(a) => {
                    if u32::from(a) < previous_end {
                        return Err(Error::InvalidAddressLayout {
                            name: var.name,
                            address: a,
                            previous_end,
                        });
                    }
                    a
                }
                None => u16::try_from(previous_end).map_err(|_| {
                    Error::Encoding(format!(
                        "variable '{}' does not fit into the 16-bit address space",
                        var.name
                    ))
                })?,
            };
            if index.insert(var.name.clone(), slots.len()).is_some() {
                return Err(Error::DuplicateVariable(var.name));
            }
            slots.push(Slot {
                name: var.name,
                kind: var.kind,
                address,
                size,
            });
        }
        // Slots end up in strictly ascending address order, so the covered
        // range runs from the first address to the last end.
        let address = slots[0].address;
        let end = slots[slots.len() - 1].end();
        Ok(RegisterLayout {
            slots,
            index,
            byteorder,
            wordorder,
            address,
            end,
        })
    }

    /// First register covered by the layout.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// One past the last register covered by the layout.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of registers a full readout covers.
    pub fn size(&self) -> u16 {
        (self.end - u32::from(self.address)) as u16
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|slot| slot.name.as_str())
    }

    /// Encode `values` into one chunk per variable, in ascending address
    /// order. `values` may cover any subset of the layout; unknown names
    /// fail with [`Error::VariableNotFound`] listing every offender.
    pub fn encode(&self, values: &Values) -> Result<Vec<Chunk>> {
        self.check_known(values.keys())?;
        let mut chunks = Vec::new();
        for slot in &self.slots {
            let Some(value) = values.get(&slot.name) else {
                continue;
            };
            chunks.push(Chunk {
                address: slot.address,
                bytes: self.encode_slot(slot, value)?,
            });
        }
        Ok(chunks)
    }

    /// Encode `values` into the smallest possible set of contiguous write
    /// regions: back-to-back variables merge into one chunk, gaps and
    /// unwritten variables split.
    pub fn build_payload(&self, values: &Values) -> Result<Vec<Chunk>> {
        self.check_known(values.keys())?;
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut run_end: u32 = 0;
        for slot in &self.slots {
            let Some(value) = values.get(&slot.name) else {
                continue;
            };
            let bytes = self.encode_slot(slot, value)?;
            match chunks.last_mut() {
                Some(chunk) if run_end == u32::from(slot.address) => {
                    chunk.bytes.extend_from_slice(&bytes);
                }
                _ => chunks.push(Chunk {
                    address: slot.address,
                    bytes,
                }),
            }
            run_end = slot.end();
        }
        Ok(chunks)
    }

    /// Decode a raw register readout covering `[address, end)`. Registers
    /// arrive as big-endian integers; the layout's byte and word order
    /// decide how their bytes are reassembled. With `variables` given,
    /// only that subset is returned.
    pub fn decode_registers(&self, raw: &[u16], variables: Option<&[&str]>) -> Result<Values> {
        if raw.len() < usize::from(self.size()) {
            return Err(Error::Encoding(format!(
                "register readout too short: got {}, layout needs {}",
                raw.len(),
                self.size()
            )));
        }
        let mut buf = BytesMut::with_capacity(raw.len() * 2);
        for &word in raw {
            buf.put_u16(word);
        }
        let selected: Vec<&Slot> = match variables {
            None => self.slots.iter().collect(),
            Some(names) => {
                self.check_known(names.iter().copied())?;
                names.iter().map(|n| &self.slots[self.index[*n]]).collect()
            }
        };
        let mut out = Values::with_capacity(selected.len());
        for slot in selected {
            let offset = usize::from(slot.address - self.address) * 2;
            let mut decoder = PayloadDecoder::new(
                &buf[offset..offset + usize::from(slot.size) * 2],
                self.byteorder,
                self.wordorder,
            );
            let value = match &slot.kind {
                Kind::Number(tag) => decoder.decode_number(*tag)?,
                Kind::Str { length } => decoder.decode_string(*length)?,
                Kind::Record(fields) => decoder.decode_record(fields)?,
            };
            out.insert(slot.name.clone(), value);
        }
        Ok(out)
    }

    /// Reconstruct a layout from its record form.
    pub fn load(record: &RegisterLayoutRecord) -> Result<Self> {
        let byteorder = record.byteorder.parse()?;
        let wordorder = record.wordorder.parse()?;
        let mut variables = Vec::with_capacity(record.variables.len());
        for var in &record.variables {
            variables.push(match var.ty.as_str() {
                "str" => {
                    let length = var.length.ok_or_else(|| {
                        Error::Encoding(format!("string variable '{}' has no length", var.name))
                    })?;
                    Variable::string(var.name.clone(), length, var.address)?
                }
                "struct" => {
                    let fields = var
                        .fields
                        .as_deref()
                        .unwrap_or_default()
                        .iter()
                        .map(|f| Field::new(f.name.clone(), &f.format))
                        .collect::<Result<Vec<_>>>()?;
                    Variable::record(var.name.clone(), fields, var.address)?
                }
                ty => Variable::number(var.name.clone(), ty, var.address)?,
            });
        }
        Self::with_orders(variables, byteorder, wordorder)
    }

    /// The record form of this layout, with all addresses resolved.
    /// `load(dump())` reconstructs an equal layout.
    pub fn dump(&self) -> RegisterLayoutRecord {
        let variables = self
            .slots
            .iter()
            .map(|slot| {
                let (ty, length, fields) = match &slot.kind {
                    Kind::Number(tag) => (tag.name().to_owned(), None, None),
                    Kind::Str { length } => ("str".to_owned(), Some(*length), None),
                    Kind::Record(fields) => (
                        "struct".to_owned(),
                        None,
                        Some(
                            fields
                                .iter()
                                .map(|f| FieldRecord {
                                    name: f.name().to_owned(),
                                    format: f.format(),
                                })
                                .collect(),
                        ),
                    ),
                };
                VariableRecord {
                    name: slot.name.clone(),
                    ty,
                    length,
                    fields,
                    address: Some(i64::from(slot.address)),
                }
            })
            .collect();
        RegisterLayoutRecord {
            variables,
            byteorder: self.byteorder.symbol().to_owned(),
            wordorder: self.wordorder.symbol().to_owned(),
        }
    }

    fn encode_slot(&self, slot: &Slot, value: &Value) -> Result<Vec<u8>> {
        let mut builder = PayloadBuilder::new(self.byteorder, self.wordorder);
        match (&slot.kind, value) {
            (Kind::Number(tag), _) => builder.add_number(*tag, value)?,
            (Kind::Str { length }, Value::Str(s)) => builder.add_string(*length, s)?,
            (Kind::Record(fields), Value::Record(map)) => builder.add_record(fields, map)?,
            _ => {
                return Err(Error::Encoding(format!(
                    "value {value:?} does not match variable '{}'",
                    slot.name
                )));
            }
        }
        Ok(builder.build().into_iter().flatten().collect())
    }

    fn check_known<I, S>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let unknown: Vec<String> = names
            .into_iter()
            .filter(|n| !self.index.contains_key(n.as_ref()))
            .map(|n| n.as_ref().to_owned())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::VariableNotFound(unknown))
        }
    }
}

fn default_order() -> String {
    ">".to_owned()
}

/// Record form of one field of a packed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub name: String,
    pub format: String,
}

/// Record form of one register variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<i64>,
}

/// Record form of a whole register layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterLayoutRecord {
    pub variables: Vec<VariableRecord>,
    #[serde(default = "default_order")]
    pub byteorder: String,
    #[serde(default = "default_order")]
    pub wordorder: String,
}
