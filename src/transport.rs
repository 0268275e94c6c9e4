use crate::error::Result;
use crate::layout::{SubSpace, Unit};
use crate::store::DataStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Modbus public function codes used by the facades.
#[allow(non_snake_case)]
#[allow(non_upper_case_globals)]
pub mod FunctionCode {
    pub const ReadCoils: u8 = 0x01;
    pub const ReadDiscreteInputs: u8 = 0x02;
    pub const ReadHoldingRegisters: u8 = 0x03;
    pub const ReadInputRegisters: u8 = 0x04;
    pub const WriteMultipleCoils: u8 = 0x0F;
    pub const WriteMultipleRegisters: u8 = 0x10;
    /// Exception responses echo the request code with this bit set.
    pub const ExceptionBit: u8 = 0x80;
}

/// Response to a register read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterResponse {
    pub function_code: u8,
    pub registers: Vec<u16>,
}

/// Response to a coil or discrete-input read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitResponse {
    pub function_code: u8,
    pub bits: Vec<bool>,
}

/// Response to a multiple-write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResponse {
    pub function_code: u8,
    pub address: u16,
    pub quantity: u16,
}

/// A Modbus transport as seen by the async facade. PDU framing and the
/// socket or serial line behind it are the implementation's concern;
/// registers cross this boundary as big-endian integers.
#[async_trait]
pub trait ModbusTransport: Send {
    async fn read_coils(&mut self, address: u16, count: u16, unit: Unit) -> Result<BitResponse>;

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<BitResponse>;

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse>;

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse>;

    async fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
        unit: Unit,
    ) -> Result<WriteResponse>;

    async fn write_coils(
        &mut self,
        address: u16,
        bits: &[bool],
        unit: Unit,
    ) -> Result<WriteResponse>;
}

/// The blocking twin of [`ModbusTransport`], driven by the threaded
/// client's worker.
pub trait SyncTransport: Send {
    fn connect(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn read_coils(&mut self, address: u16, count: u16, unit: Unit) -> Result<BitResponse>;

    fn read_discrete_inputs(&mut self, address: u16, count: u16, unit: Unit)
    -> Result<BitResponse>;

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse>;

    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse>;

    fn write_registers(&mut self, address: u16, words: &[u16], unit: Unit)
    -> Result<WriteResponse>;

    fn write_coils(&mut self, address: u16, bits: &[bool], unit: Unit) -> Result<WriteResponse>;
}

/// A transport wired straight to a [`DataStore`], standing in for a
/// remote server in tests and demos.
///
/// Requests the datastore rejects are answered the way a server would
/// answer them: with the exception bit set on the function code.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    store: Arc<DataStore>,
}

impl InMemoryTransport {
    pub fn new(store: Arc<DataStore>) -> Self {
        InMemoryTransport { store }
    }

    fn read_register_space(
        &self,
        space: SubSpace,
        function_code: u8,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> RegisterResponse {
        match self.store.read_registers(unit, space, address, count) {
            Ok(registers) => RegisterResponse {
                function_code,
                registers,
            },
            Err(_) => RegisterResponse {
                function_code: function_code | FunctionCode::ExceptionBit,
                registers: Vec::new(),
            },
        }
    }

    fn read_bit_space(
        &self,
        space: SubSpace,
        function_code: u8,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> BitResponse {
        match self.store.read_bits(unit, space, address, count) {
            Ok(bits) => BitResponse {
                function_code,
                bits,
            },
            Err(_) => BitResponse {
                function_code: function_code | FunctionCode::ExceptionBit,
                bits: Vec::new(),
            },
        }
    }

    fn write_register_space(
        &self,
        address: u16,
        words: &[u16],
        unit: Unit,
    ) -> WriteResponse {
        let function_code = match self
            .store
            .write_registers(unit, SubSpace::HoldingRegisters, address, words)
        {
            Ok(()) => FunctionCode::WriteMultipleRegisters,
            Err(_) => FunctionCode::WriteMultipleRegisters | FunctionCode::ExceptionBit,
        };
        WriteResponse {
            function_code,
            address,
            quantity: words.len() as u16,
        }
    }

    fn write_bit_space(&self, address: u16, bits: &[bool], unit: Unit) -> WriteResponse {
        let function_code = match self.store.write_bits(unit, SubSpace::Coils, address, bits) {
            Ok(()) => FunctionCode::WriteMultipleCoils,
            Err(_) => FunctionCode::WriteMultipleCoils | FunctionCode::ExceptionBit,
        };
        WriteResponse {
            function_code,
            address,
            quantity: bits.len() as u16,
        }
    }
}

#[async_trait]
impl ModbusTransport for InMemoryTransport {
    async fn read_coils(&mut self, address: u16, count: u16, unit: Unit) -> Result<BitResponse> {
        Ok(self.read_bit_space(SubSpace::Coils, FunctionCode::ReadCoils, address, count, unit))
    }

    async fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<BitResponse> {
        Ok(self.read_bit_space(
            SubSpace::DiscreteInputs,
            FunctionCode::ReadDiscreteInputs,
            address,
            count,
            unit,
        ))
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse> {
        Ok(self.read_register_space(
            SubSpace::HoldingRegisters,
            FunctionCode::ReadHoldingRegisters,
            address,
            count,
            unit,
        ))
    }

    async fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse> {
        Ok(self.read_register_space(
            SubSpace::InputRegisters,
            FunctionCode::ReadInputRegisters,
            address,
            count,
            unit,
        ))
    }

    async fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
        unit: Unit,
    ) -> Result<WriteResponse> {
        Ok(self.write_register_space(address, words, unit))
    }

    async fn write_coils(
        &mut self,
        address: u16,
        bits: &[bool],
        unit: Unit,
    ) -> Result<WriteResponse> {
        Ok(self.write_bit_space(address, bits, unit))
    }
}

impl SyncTransport for InMemoryTransport {
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_coils(&mut self, address: u16, count: u16, unit: Unit) -> Result<BitResponse> {
        Ok(self.read_bit_space(SubSpace::Coils, FunctionCode::ReadCoils, address, count, unit))
    }

    fn read_discrete_inputs(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<BitResponse> {
        Ok(self.read_bit_space(
            SubSpace::DiscreteInputs,
            FunctionCode::ReadDiscreteInputs,
            address,
            count,
            unit,
        ))
    }

    fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse> {
        Ok(self.read_register_space(
            SubSpace::HoldingRegisters,
            FunctionCode::ReadHoldingRegisters,
            address,
            count,
            unit,
        ))
    }

    fn read_input_registers(
        &mut self,
        address: u16,
        count: u16,
        unit: Unit,
    ) -> Result<RegisterResponse> {
        Ok(self.read_register_space(
            SubSpace::InputRegisters,
            FunctionCode::ReadInputRegisters,
            address,
            count,
            unit,
        ))
    }

    fn write_registers(
        &mut self,
        address: u16,
        words: &[u16],
        unit: Unit,
    ) -> Result<WriteResponse> {
        Ok(self.write_register_space(address, words, unit))
    }

    fn write_coils(&mut self, address: u16, bits: &[bool], unit: Unit) -> Result<WriteResponse> {
        Ok(self.write_bit_space(address, bits, unit))
    }
}
