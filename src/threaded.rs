use crate::error::{Error, Result};
use crate::layout::{ServerContextLayout, SubSpace, Unit};
use crate::transport::{BitResponse, FunctionCode, RegisterResponse, SyncTransport, WriteResponse};
use crate::value::{Value, Values};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, warn};
use std::thread::JoinHandle;
use std::time::Duration;

// Main -> worker.
enum Command {
    Disconnect,
    ReadCoils { address: u16, count: u16, unit: Unit },
    ReadDiscreteInputs { address: u16, count: u16, unit: Unit },
    ReadHoldingRegisters { address: u16, count: u16, unit: Unit },
    ReadInputRegisters { address: u16, count: u16, unit: Unit },
    WriteRegisters { address: u16, words: Vec<u16>, unit: Unit },
    WriteCoils { address: u16, bits: Vec<bool>, unit: Unit },
}

// Worker -> main. A fault means the worker is gone; the error inside is
// re-raised on the calling side.
enum Reply {
    Connected,
    Disconnected,
    Bits(BitResponse),
    Registers(RegisterResponse),
    Write(WriteResponse),
    Fault(Error),
}

fn worker_main<T, F>(factory: F, commands: Receiver<Command>, replies: Sender<Reply>)
where
    T: SyncTransport,
    F: FnOnce() -> Result<T>,
{
    let result = (|| -> Result<()> {
        let mut transport = factory()?;
        transport.connect()?;
        replies.send(Reply::Connected).ok();
        loop {
            // The channel closing means the client was dropped.
            let Ok(command) = commands.recv() else {
                return Ok(());
            };
            let reply = match command {
                Command::Disconnect => {
                    let result = transport.close();
                    replies.send(Reply::Disconnected).ok();
                    return result;
                }
                Command::ReadCoils {
                    address,
                    count,
                    unit,
                } => Reply::Bits(transport.read_coils(address, count, unit)?),
                Command::ReadDiscreteInputs {
                    address,
                    count,
                    unit,
                } => Reply::Bits(transport.read_discrete_inputs(address, count, unit)?),
                Command::ReadHoldingRegisters {
                    address,
                    count,
                    unit,
                } => Reply::Registers(transport.read_holding_registers(address, count, unit)?),
                Command::ReadInputRegisters {
                    address,
                    count,
                    unit,
                } => Reply::Registers(transport.read_input_registers(address, count, unit)?),
                Command::WriteRegisters {
                    address,
                    words,
                    unit,
                } => Reply::Write(transport.write_registers(address, &words, unit)?),
                Command::WriteCoils {
                    address,
                    bits,
                    unit,
                } => Reply::Write(transport.write_coils(address, &bits, unit)?),
            };
            replies.send(reply).ok();
        }
    })();
    if let Err(e) = result {
        replies.send(Reply::Fault(e)).ok();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Started,
    Stopped,
}

/// Typed client driving a [`SyncTransport`] on a dedicated worker thread.
///
/// All transport access is serialised through one command/response channel
/// pair, so at most one RPC is in flight per client. The transport itself
/// is built inside the worker by the caller-supplied factory.
pub struct Client {
    layout: ServerContextLayout,
    commands: Sender<Command>,
    replies: Receiver<Reply>,
    thread_main: Option<Box<dyn FnOnce() + Send>>,
    worker: Option<JoinHandle<()>>,
    state: State,
}

impl Client {
    pub fn new<T, F>(factory: F, layout: ServerContextLayout) -> Self
    where
        T: SyncTransport + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (command_tx, command_rx) = unbounded();
        let (reply_tx, reply_rx) = unbounded();
        let thread_main: Box<dyn FnOnce() + Send> =
            Box::new(move || worker_main(factory, command_rx, reply_tx));
        Client {
            layout,
            commands: command_tx,
            replies: reply_rx,
            thread_main: Some(thread_main),
            worker: None,
            state: State::Created,
        }
    }

    pub fn layout(&self) -> &ServerContextLayout {
        &self.layout
    }

    /// Spawn the worker and wait for the transport to connect.
    pub fn start(&mut self, timeout: Duration) -> Result<()> {
        let thread_main = self
            .thread_main
            .take()
            .ok_or_else(|| Error::Encoding("client can only be started once".to_owned()))?;
        self.worker = Some(
            std::thread::Builder::new()
                .name("mbmap-client".to_owned())
                .spawn(thread_main)?,
        );
        match self.replies.recv_timeout(timeout) {
            Ok(Reply::Connected) => {
                debug!("client worker connected");
                self.state = State::Started;
                Ok(())
            }
            Ok(Reply::Fault(e)) => {
                self.state = State::Stopped;
                Err(e)
            }
            Ok(_) => {
                self.state = State::Stopped;
                Err(Error::Encoding(
                    "unexpected reply while connecting".to_owned(),
                ))
            }
            Err(_) => {
                self.state = State::Stopped;
                Err(Error::Timeout)
            }
        }
    }

    /// Disconnect the transport and join the worker.
    pub fn stop(&mut self, timeout: Duration) -> Result<()> {
        if self.state != State::Started {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(Command::Disconnect)
            .map_err(|_| Error::NotConnected)?;
        let result = match self.replies.recv_timeout(timeout) {
            Ok(Reply::Disconnected) => Ok(()),
            Ok(Reply::Fault(e)) => Err(e),
            Ok(_) => Err(Error::Encoding(
                "unexpected reply while disconnecting".to_owned(),
            )),
            Err(_) => Err(Error::Timeout),
        };
        self.state = State::Stopped;
        // On a timeout the worker may still be alive; joining it would
        // block indefinitely.
        if !matches!(result, Err(Error::Timeout))
            && let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("client worker thread panicked");
        }
        result
    }

    pub fn read_holding_registers(
        &mut self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let (address, count) = {
            let layout = self.layout.holding_register_layout(unit)?;
            (layout.address(), layout.size())
        };
        let response = self.execute_registers(Command::ReadHoldingRegisters {
            address,
            count,
            unit,
        })?;
        expect(FunctionCode::ReadHoldingRegisters, response.function_code)?;
        self.layout
            .holding_register_layout(unit)?
            .decode_registers(&response.registers, variables)
    }

    pub fn read_input_registers(
        &mut self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let (address, count) = {
            let layout = self.layout.input_register_layout(unit)?;
            (layout.address(), layout.size())
        };
        let response = self.execute_registers(Command::ReadInputRegisters {
            address,
            count,
            unit,
        })?;
        expect(FunctionCode::ReadInputRegisters, response.function_code)?;
        self.layout
            .input_register_layout(unit)?
            .decode_registers(&response.registers, variables)
    }

    pub fn read_coils(&mut self, variables: Option<&[&str]>, unit: Unit) -> Result<Values> {
        let (address, count) = {
            let layout = self.layout.coil_layout(unit)?;
            (layout.address(), layout.size())
        };
        let response = self.execute_bits(Command::ReadCoils {
            address,
            count,
            unit,
        })?;
        expect(FunctionCode::ReadCoils, response.function_code)?;
        self.layout
            .coil_layout(unit)?
            .decode_coils(&response.bits, variables)
    }

    pub fn read_discrete_inputs(
        &mut self,
        variables: Option<&[&str]>,
        unit: Unit,
    ) -> Result<Values> {
        let (address, count) = {
            let layout = self.layout.discrete_input_layout(unit)?;
            (layout.address(), layout.size())
        };
        let response = self.execute_bits(Command::ReadDiscreteInputs {
            address,
            count,
            unit,
        })?;
        expect(FunctionCode::ReadDiscreteInputs, response.function_code)?;
        self.layout
            .discrete_input_layout(unit)?
            .decode_coils(&response.bits, variables)
    }

    /// Write `values` to the holding registers of `unit`, one request per
    /// contiguous chunk.
    pub fn write_holding_registers(&mut self, values: &Values, unit: Unit) -> Result<()> {
        let chunks = self
            .layout
            .holding_register_layout(unit)?
            .build_payload(values)?;
        for chunk in chunks {
            let response = self.execute_write(Command::WriteRegisters {
                address: chunk.address,
                words: chunk.words(),
                unit,
            })?;
            expect(FunctionCode::WriteMultipleRegisters, response.function_code)?;
        }
        Ok(())
    }

    /// Write `values` to the coils of `unit`, one request per contiguous
    /// chunk.
    pub fn write_coils(&mut self, values: &Values, unit: Unit) -> Result<()> {
        let chunks = self.layout.coil_layout(unit)?.build_payload(values)?;
        for chunk in chunks {
            let response = self.execute_write(Command::WriteCoils {
                address: chunk.address,
                bits: chunk.bits,
                unit,
            })?;
            expect(FunctionCode::WriteMultipleCoils, response.function_code)?;
        }
        Ok(())
    }

    pub fn read_holding_register(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_holding_registers(Some(&[var]), unit)?, var)
    }

    pub fn read_input_register(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_input_registers(Some(&[var]), unit)?, var)
    }

    pub fn read_coil(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_coils(Some(&[var]), unit)?, var)
    }

    pub fn read_discrete_input(&mut self, var: &str, unit: Unit) -> Result<Value> {
        single(self.read_discrete_inputs(Some(&[var]), unit)?, var)
    }

    pub fn write_holding_register(&mut self, var: &str, value: Value, unit: Unit) -> Result<()> {
        self.write_holding_registers(&Values::from([(var.to_owned(), value)]), unit)
    }

    pub fn write_coil(&mut self, var: &str, value: Value, unit: Unit) -> Result<()> {
        self.write_coils(&Values::from([(var.to_owned(), value)]), unit)
    }

    /// Write a single variable wherever the layout places it. Only
    /// holding registers and coils are writable over the wire.
    pub fn write(&mut self, var: &str, value: Value) -> Result<()> {
        let (unit, space) = self.layout.find(var)?;
        match space {
            SubSpace::HoldingRegisters => self.write_holding_register(var, value, unit),
            SubSpace::Coils => self.write_coil(var, value, unit),
            _ => Err(Error::Encoding(format!(
                "variable '{var}' lives in read-only {space}"
            ))),
        }
    }

    fn execute(&mut self, command: Command) -> Result<Reply> {
        if self.state != State::Started {
            return Err(Error::NotConnected);
        }
        self.commands
            .send(command)
            .map_err(|_| Error::NotConnected)?;
        match self.replies.recv() {
            Ok(Reply::Fault(e)) => {
                // The worker is gone after a fault.
                self.state = State::Stopped;
                Err(e)
            }
            Ok(reply) => Ok(reply),
            Err(_) => {
                self.state = State::Stopped;
                Err(Error::NotConnected)
            }
        }
    }

    fn execute_registers(&mut self, command: Command) -> Result<RegisterResponse> {
        match self.execute(command)? {
            Reply::Registers(response) => Ok(response),
            _ => Err(Error::Encoding("unexpected reply type".to_owned())),
        }
    }

    fn execute_bits(&mut self, command: Command) -> Result<BitResponse> {
        match self.execute(command)? {
            Reply::Bits(response) => Ok(response),
            _ => Err(Error::Encoding("unexpected reply type".to_owned())),
        }
    }

    fn execute_write(&mut self, command: Command) -> Result<WriteResponse> {
        match self.execute(command)? {
            Reply::Write(response) => Ok(response),
            _ => Err(Error::Encoding("unexpected reply type".to_owned())),
        }
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

/// A Modbus server running as a child process so that it cannot block the
/// caller.
///
/// The shutdown is graceless: the child is killed, not asked to stop.
pub struct Server {
    command: std::process::Command,
    child: Option<std::process::Child>,
}

impl Server {
    pub fn new(command: std::process::Command) -> Self {
        Server {
            command,
            child: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Err(Error::Encoding("server is already running".to_owned()));
        }
        self.child = Some(self.command.spawn()?);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            child.kill()?;
            child.wait()?;
        }
        Ok(())
    }
}

impl Drop for Server {
    // In case the user forgot to clean up.
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("failed to stop server child process: {e}");
        }
    }
}
