use crate::coils::CoilLayout;
use crate::error::{Error, Result};
use crate::registers::RegisterLayout;
use std::collections::BTreeMap;
use std::fmt;

/// Unit (slave) id of a logical device within a Modbus server.
pub type Unit = u8;

/// The unit addressed when the caller does not care.
pub const DEFAULT_SLAVE: Unit = 0;

/// One of the four Modbus sub-spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubSpace {
    HoldingRegisters,
    InputRegisters,
    Coils,
    DiscreteInputs,
}

impl SubSpace {
    // Probe order used by variable search.
    const ALL: [SubSpace; 4] = [
        SubSpace::InputRegisters,
        SubSpace::HoldingRegisters,
        SubSpace::Coils,
        SubSpace::DiscreteInputs,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubSpace::HoldingRegisters => "holding_registers",
            SubSpace::InputRegisters => "input_registers",
            SubSpace::Coils => "coils",
            SubSpace::DiscreteInputs => "discrete_inputs",
        }
    }
}

impl fmt::Display for SubSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The layouts of one slave, each sub-space optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlaveContextLayout {
    pub holding_registers: Option<RegisterLayout>,
    pub input_registers: Option<RegisterLayout>,
    pub coils: Option<CoilLayout>,
    pub discrete_inputs: Option<CoilLayout>,
}

impl SlaveContextLayout {
    fn contains(&self, space: SubSpace, var: &str) -> bool {
        match space {
            SubSpace::HoldingRegisters => {
                self.holding_registers.as_ref().is_some_and(|l| l.contains(var))
            }
            SubSpace::InputRegisters => {
                self.input_registers.as_ref().is_some_and(|l| l.contains(var))
            }
            SubSpace::Coils => self.coils.as_ref().is_some_and(|l| l.contains(var)),
            SubSpace::DiscreteInputs => {
                self.discrete_inputs.as_ref().is_some_and(|l| l.contains(var))
            }
        }
    }
}

/// Per-slave layout lookup for a whole server, keyed by unit id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerContextLayout {
    slaves: BTreeMap<Unit, SlaveContextLayout>,
}

impl ServerContextLayout {
    pub fn new(slaves: BTreeMap<Unit, SlaveContextLayout>) -> Self {
        ServerContextLayout { slaves }
    }

    /// Layout of a single slave, for servers with only one unit.
    pub fn single(slave: SlaveContextLayout) -> Self {
        Self::new(BTreeMap::from([(DEFAULT_SLAVE, slave)]))
    }

    pub fn holding_register_layout(&self, unit: Unit) -> Result<&RegisterLayout> {
        self.slave(unit)?
            .holding_registers
            .as_ref()
            .ok_or(Error::MissingSubLayout {
                unit,
                space: SubSpace::HoldingRegisters,
            })
    }

    pub fn input_register_layout(&self, unit: Unit) -> Result<&RegisterLayout> {
        self.slave(unit)?
            .input_registers
            .as_ref()
            .ok_or(Error::MissingSubLayout {
                unit,
                space: SubSpace::InputRegisters,
            })
    }

    pub fn coil_layout(&self, unit: Unit) -> Result<&CoilLayout> {
        self.slave(unit)?.coils.as_ref().ok_or(Error::MissingSubLayout {
            unit,
            space: SubSpace::Coils,
        })
    }

    pub fn discrete_input_layout(&self, unit: Unit) -> Result<&CoilLayout> {
        self.slave(unit)?
            .discrete_inputs
            .as_ref()
            .ok_or(Error::MissingSubLayout {
                unit,
                space: SubSpace::DiscreteInputs,
            })
    }

    /// Find the unit and sub-space holding `var`, probing units in
    /// ascending order.
    pub fn find(&self, var: &str) -> Result<(Unit, SubSpace)> {
        for (&unit, slave) in &self.slaves {
            for space in SubSpace::ALL {
                if slave.contains(space, var) {
                    return Ok((unit, space));
                }
            }
        }
        Err(Error::VariableNotFound(vec![var.to_owned()]))
    }

    /// The sub-space of `unit` holding `var`.
    pub fn locate(&self, var: &str, unit: Unit) -> Result<SubSpace> {
        let slave = self.slave(unit)?;
        SubSpace::ALL
            .into_iter()
            .find(|&space| slave.contains(space, var))
            .ok_or_else(|| Error::VariableNotFound(vec![var.to_owned()]))
    }

    fn slave(&self, unit: Unit) -> Result<&SlaveContextLayout> {
        self.slaves.get(&unit).ok_or(Error::NoSuchSlaveLayout(unit))
    }
}
