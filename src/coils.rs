use crate::error::{Error, Result};
use crate::value::{Value, Values};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A declared coil variable: a run of `size` consecutive bits.
///
/// A variable of size 1 carries a scalar bool, larger variables carry a
/// bool sequence of exactly their size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    name: String,
    size: u16,
    address: Option<u16>,
}

impl Variable {
    pub fn new(
        name: impl Into<String>,
        size: i64,
        address: impl Into<Option<i64>>,
    ) -> Result<Self> {
        let name = name.into();
        if size < 1 {
            return Err(Error::InvalidSize { name, size });
        }
        let size = u16::try_from(size).map_err(|_| {
            Error::Encoding(format!(
                "coil variable '{name}' of size {size} exceeds the address space"
            ))
        })?;
        let address = match address.into() {
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
            size,
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Width in bits.
    pub fn size(&self) -> u16 {
        self.size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    name: String,
    address: u16,
    size: u16,
}

impl Slot {
    fn end(&self) -> u32 {
        u32::from(self.address) + u32::from(self.size)
    }
}

/// One contiguous run of coil writes, targeting a single wire
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub address: u16,
    pub bits: Vec<bool>,
}

/// An immutable, address-ordered collection of coil variables.
#[derive(Debug, Clone, PartialEq)]
pub struct CoilLayout {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    address: u16,
    end: u32,
}

impl CoilLayout {
    pub fn new(variables: Vec<Variable>) -> Result<Self> {
        if variables.is_empty() {
            return Err(Error::NoVariables);
        }
        let mut slots: Vec<Slot> = Vec::with_capacity(variables.len());
        let mut index = HashMap::with_capacity(variables.len());
        for var in variables {
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
                address,
                size: var.size,
            });
        }
        let address = slots[0].address;
        let end = slots[slots.len() - 1].end();
        Ok(CoilLayout {
            slots,
            index,
            address,
            end,
        })
    }

    /// First coil covered by the layout.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// One past the last coil covered by the layout.
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of coils a full readout covers.
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
    /// order.
    pub fn encode(&self, values: &Values) -> Result<Vec<Chunk>> {
        self.check_known(values.keys())?;
        let mut chunks = Vec::new();
        for slot in &self.slots {
            let Some(value) = values.get(&slot.name) else {
                continue;
            };
            chunks.push(Chunk {
                address: slot.address,
                bits: encode_slot(slot, value)?,
            });
        }
        Ok(chunks)
    }

    /// Encode `values` into the smallest possible set of contiguous bit
    /// runs; see [`crate::registers::RegisterLayout::build_payload`].
    pub fn build_payload(&self, values: &Values) -> Result<Vec<Chunk>> {
        self.check_known(values.keys())?;
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut run_end: u32 = 0;
        for slot in &self.slots {
            let Some(value) = values.get(&slot.name) else {
                continue;
            };
            let bits = encode_slot(slot, value)?;
            match chunks.last_mut() {
                Some(chunk) if run_end == u32::from(slot.address) => {
                    chunk.bits.extend_from_slice(&bits);
                }
                _ => chunks.push(Chunk {
                    address: slot.address,
                    bits,
                }),
            }
            run_end = slot.end();
        }
        Ok(chunks)
    }

    /// Decode a raw bit readout covering `[address, end)`. With
    /// `variables` given, only that subset is returned.
    pub fn decode_coils(&self, raw: &[bool], variables: Option<&[&str]>) -> Result<Values> {
        if raw.len() < usize::from(self.size()) {
            return Err(Error::Encoding(format!(
                "coil readout too short: got {}, layout needs {}",
                raw.len(),
                self.size()
            )));
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
            let offset = usize::from(slot.address - self.address);
            let bits = &raw[offset..offset + usize::from(slot.size)];
            let value = if slot.size == 1 {
                Value::Bit(bits[0])
            } else {
                Value::Bits(bits.to_vec())
            };
            out.insert(slot.name.clone(), value);
        }
        Ok(out)
    }

    /// Reconstruct a layout from its record form.
    pub fn load(records: &[CoilRecord]) -> Result<Self> {
        let variables = records
            .iter()
            .map(|r| Variable::new(r.name.clone(), r.size, r.address))
            .collect::<Result<Vec<_>>>()?;
        Self::new(variables)
    }

    /// The record form of this layout, with all addresses resolved.
    pub fn dump(&self) -> Vec<CoilRecord> {
        self.slots
            .iter()
            .map(|slot| CoilRecord {
                name: slot.name.clone(),
                size: i64::from(slot.size),
                address: Some(i64::from(slot.address)),
            })
            .collect()
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

fn encode_slot(slot: &Slot, value: &Value) -> Result<Vec<bool>> {
    match value {
        Value::Bit(b) if slot.size == 1 => Ok(vec![*b]),
        Value::Bits(bits) if bits.len() == usize::from(slot.size) => Ok(bits.clone()),
        Value::Bits(bits) => Err(Error::Encoding(format!(
            "variable '{}' holds {} coils, got {} values",
            slot.name,
            slot.size,
            bits.len()
        ))),
        _ => Err(Error::Encoding(format!(
            "value {value:?} does not match coil variable '{}'",
            slot.name
        ))),
    }
}

fn default_size() -> i64 {
    1
}

/// Record form of one coil variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoilRecord {
    pub name: String,
    #[serde(default = "default_size")]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<i64>,
}
