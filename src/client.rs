use crate::error::{Error, Result};
use crate::layout::{ServerContextLayout, Unit};
use crate::transport::{FunctionCode, ModbusTransport};
use crate::value::{Value, Values};
use log::debug;

/// Typed read/write facade over an async [`ModbusTransport`].
///
/// Reads fetch the addressed layout's whole range in one request; writes
/// issue one request per chunk produced by the payload planner.
#[derive(Debug)]
pub struct Protocol<T> {
    transport: T,
    layout: ServerContextLayout,
}

impl<T: ModbusTransport> Protocol<T> {
    pub fn new(transport: T, layout: ServerContextLayout) -> Self {
        Protocol { transport, layout }
    }

    pub fn layout(&self) -> &ServerContextLayout {
        &self.layout
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub async fn read_holding_registers(
        &mut self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let layout = self.layout.holding_register_layout(unit)?;
        let response = self
            .transport
            .read_holding_registers(layout.address(), layout.size(), unit)
            .await?;
        expect(FunctionCode::ReadHoldingRegisters, response.function_code)?;
        layout.decode_registers(&response.registers, variables)
    }

    pub async fn read_input_registers(
        &mut self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let layout = self.layout.input_register_layout(unit)?;
        let response = self
            .transport
            .read_input_registers(layout.address(), layout.size(), unit)
            .await?;
        expect(FunctionCode::ReadInputRegisters, response.function_code)?;
        layout.decode_registers(&response.registers, variables)
    }

    pub async fn read_coils(&mut self, variables: Option<&[&str]>, unit: Unit) -> Result<Values> {
        let layout = self.layout.coil_layout(unit)?;
        let response = self
            .transport
            .read_coils(layout.address(), layout.size(), unit)
            .await?;
        expect(FunctionCode::ReadCoils, response.function_code)?;
        layout.decode_coils(&response.bits, variables)
    }

    pub async fn read_discrete_inputs(
        &mut self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let layout = self.layout.discrete_input_layout(unit)?;
        let response = self
            .transport
            .read_discrete_inputs(layout.address(), layout.size(), unit)
            .await?;
        expect(FunctionCode::ReadDiscreteInputs, response.function_code)?;
        layout.decode_coils(&response.bits, variables)
    }

    /// Write `values` to the holding registers of `unit`, one request per
    /// contiguous chunk.
    pub async fn write_holding_registers(&mut self, values: &Values, unit: Unit) -> Result<()> {
        let layout = self.layout.holding_register_layout(unit)?;
        let chunks = layout.build_payload(values)?;
        debug!(
            "writing {} value(s) to unit {unit} in {} chunk(s)",
            values.len(),
            chunks.len()
        );
        for chunk in chunks {
            let response = self
                .transport
                .write_registers(chunk.address, &chunk.words(), unit)
                .await?;
            expect(FunctionCode::WriteMultipleRegisters, response.function_code)?;
        }
        Ok(())
    }

    /// Write `values` to the coils of `unit`, one request per contiguous
    /// chunk.
    pub async fn write_coils(&mut self, values: &Values, unit: Unit) -> Result<()> {
        let layout = self.layout.coil_layout(unit)?;
        let chunks = layout.build_payload(values)?;
        debug!(
            "writing {} coil value(s) to unit {unit} in {} chunk(s)",
            values.len(),
            chunks.len()
        );
        for chunk in chunks {
            let response = self
                .transport
                .write_coils(chunk.address, &chunk.bits, unit)
                .await?;
            expect(FunctionCode::WriteMultipleCoils, response.function_code)?;
        }
        Ok(())
    }

    /// Read a single holding-register variable. Like all reads, this
    /// performs a complete readout of the layout's range.
    pub async fn read_holding_register(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_holding_registers(Some(&[var]), unit).await?, var)
    }

    pub async fn read_input_register(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_input_registers(Some(&[var]), unit).await?, var)
    }

    pub async fn read_coil(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_coils(Some(&[var]), unit).await?, var)
    }

    pub async fn read_discrete_input(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_discrete_inputs(Some(&[var]), unit).await?, var)
    }

    pub async fn write_holding_register(
        &mut self,
        var: &str,
        value: Value,
        unit: Unit,
    ) -> Result<()> {
        self.write_holding_registers(&Values::from([(var.to_owned(), value)]), unit)
            .await
    }

    pub async fn write_coil(&mut self, var: &str, value: Value, unit: Unit) -> Result<()> {
        self.write_coils(&Values::from([(var.to_owned(), value)]), unit)
            .await
    }
}

fn expect(expected: u8, got: u8) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::ModbusResponse { expected, got })
    }
}

fn single(mut values: Values, var: &str) -> Result<Value> {
    values
        .remove(var)
        .ok_or_else(|| Error::VariableNotFound(vec![var.to_owned()]))
}
