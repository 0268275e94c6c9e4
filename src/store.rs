use crate::error::{Error, Result};
use crate::layout::{SubSpace, Unit};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// The four value blocks of one slave.
///
/// Registers are stored as big-endian integers. Each block sits behind its
/// own lock, so single reads and writes are ordered at block granularity;
/// a reader racing a multi-chunk write may still observe a torn value
/// across chunks.
#[derive(Debug)]
pub struct SlaveStore {
    holding_registers: Mutex<Vec<u16>>,
    input_registers: Mutex<Vec<u16>>,
    coils: Mutex<Vec<bool>>,
    discrete_inputs: Mutex<Vec<bool>>,
}

impl SlaveStore {
    /// Zero-initialised blocks of `registers` registers and `bits` coils
    /// per sub-space.
    pub fn new(registers: usize, bits: usize) -> Self {
        Self::with_blocks(
            vec![0; registers],
            vec![0; registers],
            vec![false; bits],
            vec![false; bits],
        )
    }

    pub fn with_blocks(
        holding_registers: Vec<u16>,
        input_registers: Vec<u16>,
        coils: Vec<bool>,
        discrete_inputs: Vec<bool>,
    ) -> Self {
        SlaveStore {
            holding_registers: Mutex::new(holding_registers),
            input_registers: Mutex::new(input_registers),
            coils: Mutex::new(coils),
            discrete_inputs: Mutex::new(discrete_inputs),
        }
    }

    fn register_block(&self, space: SubSpace) -> Result<&Mutex<Vec<u16>>> {
        match space {
            SubSpace::HoldingRegisters => Ok(&self.holding_registers),
            SubSpace::InputRegisters => Ok(&self.input_registers),
            _ => Err(Error::Encoding(format!("{space} is not a register space"))),
        }
    }

    fn bit_block(&self, space: SubSpace) -> Result<&Mutex<Vec<bool>>> {
        match space {
            SubSpace::Coils => Ok(&self.coils),
            SubSpace::DiscreteInputs => Ok(&self.discrete_inputs),
            _ => Err(Error::Encoding(format!("{space} is not a bit space"))),
        }
    }
}

/// In-process datastore backing the local facade and the in-memory
/// transport: one [`SlaveStore`] per unit.
#[derive(Debug)]
pub struct DataStore {
    slaves: BTreeMap<Unit, SlaveStore>,
}

impl DataStore {
    pub fn new(slaves: BTreeMap<Unit, SlaveStore>) -> Self {
        DataStore { slaves }
    }

    /// A datastore with a single slave at the default unit.
    pub fn single(slave: SlaveStore) -> Self {
        Self::new(BTreeMap::from([(crate::layout::DEFAULT_SLAVE, slave)]))
    }

    pub fn read_registers(
        &self,
        unit: Unit,
        space: SubSpace,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let block = self.slave(unit)?.register_block(space)?.lock().unwrap();
        let range = check_range(space, block.len(), address, count)?;
        Ok(block[range].to_vec())
    }

    pub fn write_registers(
        &self,
        unit: Unit,
        space: SubSpace,
        address: u16,
        words: &[u16],
    ) -> Result<()> {
        let mut block = self.slave(unit)?.register_block(space)?.lock().unwrap();
        let range = check_range(space, block.len(), address, words.len() as u16)?;
        block[range].copy_from_slice(words);
        Ok(())
    }

    pub fn read_bits(
        &self,
        unit: Unit,
        space: SubSpace,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        let block = self.slave(unit)?.bit_block(space)?.lock().unwrap();
        let range = check_range(space, block.len(), address, count)?;
        Ok(block[range].to_vec())
    }

    pub fn write_bits(
        &self,
        unit: Unit,
        space: SubSpace,
        address: u16,
        bits: &[bool],
    ) -> Result<()> {
        let mut block = self.slave(unit)?.bit_block(space)?.lock().unwrap();
        let range = check_range(space, block.len(), address, bits.len() as u16)?;
        block[range].copy_from_slice(bits);
        Ok(())
    }

    fn slave(&self, unit: Unit) -> Result<&SlaveStore> {
        self.slaves.get(&unit).ok_or(Error::NoSuchSlave(unit))
    }
}

fn check_range(
    space: SubSpace,
    len: usize,
    address: u16,
    count: u16,
) -> Result<std::ops::Range<usize>> {
    let start = usize::from(address);
    let end = start + usize::from(count);
    if end > len {
        return Err(Error::Encoding(format!(
            "access of {space} [{start}, {end}) is outside the block of {len} cells"
        )));
    }
    Ok(start..end)
}
