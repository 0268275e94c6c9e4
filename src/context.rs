use crate::error::Result;
use crate::layout::{ServerContextLayout, SubSpace, Unit};
use crate::store::DataStore;
use crate::value::{Value, Values};
use std::sync::Arc;

/// Typed get/set facade over an in-process [`DataStore`].
///
/// Every get decodes a single range readout of the addressed layout,
/// every set writes the minimal chunk set produced by the planner. The
/// layout is consulted before the datastore, so a missing layout surfaces
/// as [`NoSuchSlaveLayout`](crate::Error::NoSuchSlaveLayout) or
/// [`MissingSubLayout`](crate::Error::MissingSubLayout) even for units the
/// datastore does not know.
#[derive(Debug, Clone)]
pub struct ServerContext {
    store: Arc<DataStore>,
    layout: Arc<ServerContextLayout>,
}

impl ServerContext {
    pub fn new(store: Arc<DataStore>, layout: ServerContextLayout) -> Self {
        ServerContext {
            store,
            layout: Arc::new(layout),
        }
    }

    pub fn layout(&self) -> &ServerContextLayout {
        &self.layout
    }

    pub fn get_holding_registers(
        &self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let layout = self.layout.holding_register_layout(unit)?;
        let raw = self.store.read_registers(
            unit,
            SubSpace::HoldingRegisters,
            layout.address(),
            layout.size(),
        )?;
        layout.decode_registers(&raw, variables)
    }

    pub fn set_holding_registers(&self, values: &Values, unit: Unit) -> Result<()> {
        let layout = self.layout.holding_register_layout(unit)?;
        for chunk in layout.build_payload(values)? {
            self.store.write_registers(
                unit,
                SubSpace::HoldingRegisters,
                chunk.address,
                &chunk.words(),
            )?;
        }
        Ok(())
    }

    pub fn get_input_registers(&self, variables: Option<&[&str]>, unit: Unit) -> Result<Values> {
        let layout = self.layout.input_register_layout(unit)?;
        let raw = self.store.read_registers(
            unit,
            SubSpace::InputRegisters,
            layout.address(),
            layout.size(),
        )?;
        layout.decode_registers(&raw, variables)
    }

    pub fn set_input_registers(&self, values: &Values, unit: Unit) -> Result<()> {
        let layout = self.layout.input_register_layout(unit)?;
        for chunk in layout.build_payload(values)? {
            self.store.write_registers(
                unit,
                SubSpace::InputRegisters,
                chunk.address,
                &chunk.words(),
            )?;
        }
        Ok(())
    }

    pub fn get_coils(&self, variables: Option<&[&str]>, unit: Unit) -> Result<Values> {
        let layout = self.layout.coil_layout(unit)?;
        let raw = self
            .store
            .read_bits(unit, SubSpace::Coils, layout.address(), layout.size())?;
        layout.decode_coils(&raw, variables)
    }

    pub fn set_coils(&self, values: &Values, unit: Unit) -> Result<()> {
        let layout = self.layout.coil_layout(unit)?;
        for chunk in layout.build_payload(values)? {
            self.store
                .write_bits(unit, SubSpace::Coils, chunk.address, &chunk.bits)?;
        }
        Ok(())
    }

    pub fn get_discrete_inputs(&self, variables: Option<&[&str]>, unit: Unit) -> Result<Values> {
        let layout = self.layout.discrete_input_layout(unit)?;
        let raw = self.store.read_bits(
            unit,
            SubSpace::DiscreteInputs,
            layout.address(),
            layout.size(),
        )?;
        layout.decode_coils(&raw, variables)
    }

    pub fn set_discrete_inputs(&self, values: &Values, unit: Unit) -> Result<()> {
        let layout = self.layout.discrete_input_layout(unit)?;
        for chunk in layout.build_payload(values)? {
            self.store
                .write_bits(unit, SubSpace::DiscreteInputs, chunk.address, &chunk.bits)?;
        }
        Ok(())
    }

    /// Read a single variable from the holding registers of `unit`. Like
    /// all reads, this performs a complete readout of the layout's range.
    pub fn get_holding_register(&self, var: &str, unit: Unit) -> Result<Value> {
        single(self.get_holding_registers(Some(&[var]), unit)?, var)
    }

    pub fn get_input_register(&self, var: &str, unit: Unit) -> Result<Value> {
        single(self.get_input_registers(Some(&[var]), unit)?, var)
    }

    pub fn get_coil(&self, var: &str, unit: Unit) -> Result<Value> {
        single(self.get_coils(Some(&[var]), unit)?, var)
    }

    pub fn get_discrete_input(&self, var: &str, unit: Unit) -> Result<Value> {
        single(self.get_discrete_inputs(Some(&[var]), unit)?, var)
    }
}

fn single(mut values: Values, var: &str) -> Result<Value> {
    values
        .remove(var)
        .ok_or_else(|| crate::error::Error::VariableNotFound(vec![var.to_owned()]))
}
