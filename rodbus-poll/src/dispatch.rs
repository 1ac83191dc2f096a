use std::io::Write;

use rodbus::AddressRange;

use crate::codec::WordOrder;
use crate::config::{Config, DataType, RegisterFormat, WriteValue};
use crate::error::{OperationError, TransportError};
use crate::session::{BoundSession, RegisterSpace, Session};

/// A read of one address space
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadOperation {
    /// read coils
    Coils,
    /// read discrete inputs
    DiscreteInputs,
    /// read input registers, rendered in a format
    InputRegisters(RegisterFormat),
    /// read holding registers, rendered in a format
    HoldingRegisters(RegisterFormat),
}

/// Values written to holding registers, already narrowed for their data type
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValues {
    /// one word per register
    Words(Vec<u16>),
    /// 32-bit integers, two registers each
    Int(Vec<u32>),
    /// 32-bit floats, two registers each
    Float(Vec<f32>),
}

/// A write to one of the writable address spaces
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// write coils
    Coils(Vec<bool>),
    /// write holding registers
    HoldingRegisters(RegisterValues),
}

/// The single category of operation performed by a run
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// read `count` values, possibly repeatedly
    Read(ReadOperation),
    /// write values exactly once
    Write(WriteOperation),
}

impl Operation {
    /// Select the operation for a configuration
    ///
    /// Write values are narrowed here, so a run that can't succeed fails before connecting.
    pub fn resolve(config: &Config) -> Result<Self, OperationError> {
        if config.is_write() {
            return resolve_write(config).map(Operation::Write);
        }

        if config.data_type.is_wide() && config.count % 2 != 0 {
            return Err(OperationError::OddWideCount(config.count));
        }

        let read = match config.data_type {
            DataType::Coil => ReadOperation::Coils,
            DataType::DiscreteInput => ReadOperation::DiscreteInputs,
            DataType::InputRegister(format) => ReadOperation::InputRegisters(format),
            DataType::HoldingRegister(format) => ReadOperation::HoldingRegisters(format),
        };
        Ok(Operation::Read(read))
    }

    /// True for reads, the only operations that are repeated when polling
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::Read(_))
    }
}

fn resolve_write(config: &Config) -> Result<WriteOperation, OperationError> {
    let values = &config.write_values;
    match config.data_type {
        DataType::Coil => Ok(WriteOperation::Coils(
            values.iter().map(|x| x.to_coil()).collect(),
        )),
        DataType::HoldingRegister(RegisterFormat::Decimal | RegisterFormat::Hex) => {
            let words = values
                .iter()
                .map(|x| x.to_word())
                .collect::<Result<Vec<u16>, _>>()?;
            Ok(WriteOperation::HoldingRegisters(RegisterValues::Words(
                words,
            )))
        }
        DataType::HoldingRegister(RegisterFormat::Int) => {
            let ints = combine_pairs(values, config.word_order, "integers")?;
            Ok(WriteOperation::HoldingRegisters(RegisterValues::Int(ints)))
        }
        DataType::HoldingRegister(RegisterFormat::Float) => {
            let floats = combine_pairs(values, config.word_order, "floats")?
                .into_iter()
                .map(f32::from_bits)
                .collect();
            Ok(WriteOperation::HoldingRegisters(RegisterValues::Float(
                floats,
            )))
        }
        DataType::DiscreteInput | DataType::InputRegister(_) => {
            Err(OperationError::NotWritable(config.data_type))
        }
    }
}

fn combine_pairs(
    values: &[WriteValue],
    order: WordOrder,
    kind: &'static str,
) -> Result<Vec<u32>, OperationError> {
    if values.len() % 2 != 0 {
        return Err(OperationError::OddWriteCount(kind));
    }

    values
        .chunks_exact(2)
        .map(|pair| Ok::<_, OperationError>(order.combine(pair[0].to_word()?, pair[1].to_word()?)))
        .collect()
}

/// Addresses targeted by the operations of a run
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Addressing {
    /// first address as displayed to the user
    pub display_start: u16,
    /// first address on the wire
    pub wire_start: u16,
    /// number of values to read
    pub count: u16,
}

impl Addressing {
    /// Addressing of a configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            display_start: config.start_ref,
            wire_start: config.wire_start(),
            count: config.count,
        }
    }

    fn display_address(&self, offset: usize) -> usize {
        usize::from(self.display_start) + offset
    }

    fn read_range(&self) -> Result<AddressRange, OperationError> {
        AddressRange::try_from(self.wire_start, self.count).map_err(OperationError::Range)
    }
}

/// Performs operations on a bound session and renders the results
pub struct Dispatcher<S, W> {
    session: BoundSession<S>,
    addressing: Addressing,
    out: W,
}

impl<S, W> Dispatcher<S, W>
where
    S: Session,
    W: Write,
{
    /// Create a dispatcher writing its results to `out`
    pub fn new(session: BoundSession<S>, addressing: Addressing, out: W) -> Self {
        Self {
            session,
            addressing,
            out,
        }
    }

    /// Give back the session and the output
    pub fn into_parts(self) -> (BoundSession<S>, W) {
        (self.session, self.out)
    }

    /// Perform an operation once
    pub async fn execute(&mut self, operation: &Operation) -> Result<(), OperationError> {
        match operation {
            Operation::Read(read) => self.read(*read).await?,
            Operation::Write(write) => self.write(write).await?,
        }
        self.out.flush()?;
        Ok(())
    }

    async fn read(&mut self, operation: ReadOperation) -> Result<(), OperationError> {
        let range = self.addressing.read_range()?;
        match operation {
            ReadOperation::Coils => {
                let values = self
                    .session
                    .session()
                    .read_coils(range)
                    .await
                    .map_err(failed("read coils"))?;
                self.print_bits(DataType::Coil, &values)
            }
            ReadOperation::DiscreteInputs => {
                let values = self
                    .session
                    .session()
                    .read_discrete_inputs(range)
                    .await
                    .map_err(failed("read discrete inputs"))?;
                self.print_bits(DataType::DiscreteInput, &values)
            }
            ReadOperation::InputRegisters(format) => {
                let values = self
                    .session
                    .session()
                    .read_registers(RegisterSpace::Input, range)
                    .await
                    .map_err(failed("read input registers"))?;
                self.print_registers(DataType::InputRegister(format), &values)
            }
            ReadOperation::HoldingRegisters(format) => {
                let values = self
                    .session
                    .session()
                    .read_registers(RegisterSpace::Holding, range)
                    .await
                    .map_err(failed("read holding registers"))?;
                self.print_registers(DataType::HoldingRegister(format), &values)
            }
        }
    }

    async fn write(&mut self, operation: &WriteOperation) -> Result<(), OperationError> {
        let start = self.addressing.wire_start;
        match operation {
            WriteOperation::Coils(values) => {
                check_write_range(start, values.len())?;
                self.session
                    .session()
                    .write_coils(start, values.clone())
                    .await
                    .map_err(failed("write coils"))?;
                self.print_header_for_write(values.len(), "coil(s)")?;
                for (i, value) in values.iter().enumerate() {
                    let address = self.addressing.display_address(i);
                    writeln!(self.out, "[{}]: {}", address, u8::from(*value))?;
                }
            }
            WriteOperation::HoldingRegisters(RegisterValues::Words(words)) => {
                check_write_range(start, words.len())?;
                self.session
                    .session()
                    .write_registers(start, words.clone())
                    .await
                    .map_err(failed("write holding registers"))?;
                self.print_header_for_write(words.len(), "16-bit register(s)")?;
                for (i, word) in words.iter().enumerate() {
                    let address = self.addressing.display_address(i);
                    writeln!(self.out, "[{address}]: {word}")?;
                }
            }
            WriteOperation::HoldingRegisters(RegisterValues::Int(values)) => {
                let order = self.session.word_order();
                let words = values.iter().flat_map(|x| order.encode_u32(*x)).collect();
                self.write_wide(words, "write 32-bit integers").await?;
                self.print_header_for_write(values.len(), "32-bit integer(s)")?;
                for (i, value) in values.iter().enumerate() {
                    let address = self.addressing.display_address(2 * i);
                    writeln!(self.out, "[{address}]: {value}")?;
                }
            }
            WriteOperation::HoldingRegisters(RegisterValues::Float(values)) => {
                let order = self.session.word_order();
                let words = values.iter().flat_map(|x| order.encode_f32(*x)).collect();
                self.write_wide(words, "write 32-bit floats").await?;
                self.print_header_for_write(values.len(), "32-bit float(s)")?;
                for (i, value) in values.iter().enumerate() {
                    let address = self.addressing.display_address(2 * i);
                    writeln!(self.out, "[{address}]: {value:.2}")?;
                }
            }
        }
        Ok(())
    }

    async fn write_wide(
        &mut self,
        words: Vec<u16>,
        operation: &'static str,
    ) -> Result<(), OperationError> {
        let start = self.addressing.wire_start;
        check_write_range(start, words.len())?;
        self.session
            .session()
            .write_registers(start, words)
            .await
            .map_err(failed(operation))
    }

    fn print_header_for_write(&mut self, count: usize, unit: &str) -> Result<(), OperationError> {
        writeln!(
            self.out,
            "Successfully wrote {} {} starting at address {}",
            count, unit, self.addressing.display_start
        )?;
        Ok(())
    }

    fn print_header_for_read(&mut self, data_type: DataType) -> Result<(), OperationError> {
        let first = self.addressing.display_address(0);
        let last = first + usize::from(self.addressing.count) - 1;
        writeln!(self.out, "{} ({}-{}):", data_type.label(), first, last)?;
        Ok(())
    }

    fn print_bits(&mut self, data_type: DataType, values: &[bool]) -> Result<(), OperationError> {
        self.print_header_for_read(data_type)?;
        for (i, value) in values.iter().enumerate() {
            let address = self.addressing.display_address(i);
            writeln!(self.out, "[{}]: {}", address, u8::from(*value))?;
        }
        Ok(())
    }

    fn print_registers(
        &mut self,
        data_type: DataType,
        values: &[u16],
    ) -> Result<(), OperationError> {
        self.print_header_for_read(data_type)?;
        let order = self.session.word_order();
        match data_type.format() {
            Some(format) if format.is_wide() => {
                for (pair_index, pair) in values.chunks(2).enumerate() {
                    let offset = 2 * pair_index;
                    let annotation = match (format, pair) {
                        (RegisterFormat::Float, &[first, second]) => Some(format!(
                            " ({:.2} as 32-bit float)",
                            order.decode_f32([first, second])
                        )),
                        (_, &[first, second]) => Some(format!(
                            " ({} as 32-bit int)",
                            order.decode_i32([first, second])
                        )),
                        _ => None,
                    };
                    self.print_register(offset, pair[0], annotation.as_deref())?;
                    if let Some(second) = pair.get(1) {
                        self.print_register(offset + 1, *second, None)?;
                    }
                }
            }
            Some(RegisterFormat::Hex) => {
                for (i, value) in values.iter().enumerate() {
                    self.print_register(i, *value, Some(&format!(" (0x{value:04X})")))?;
                }
            }
            _ => {
                for (i, value) in values.iter().enumerate() {
                    self.print_register(i, *value, None)?;
                }
            }
        }
        Ok(())
    }

    fn print_register(
        &mut self,
        offset: usize,
        value: u16,
        annotation: Option<&str>,
    ) -> Result<(), OperationError> {
        let address = self.addressing.display_address(offset);
        writeln!(
            self.out,
            "[{}]: {}{}",
            address,
            value,
            annotation.unwrap_or_default()
        )?;
        Ok(())
    }
}

fn check_write_range(start: u16, count: usize) -> Result<(), OperationError> {
    let fits = u16::try_from(count)
        .ok()
        .and_then(|count| AddressRange::try_from(start, count).ok())
        .is_some();
    if fits {
        Ok(())
    } else {
        Err(OperationError::WriteRange { start, count })
    }
}

fn failed(operation: &'static str) -> impl FnOnce(TransportError) -> OperationError {
    move |source| OperationError::Request { operation, source }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rodbus::UnitId;

    use super::*;
    use crate::config::{DataBits, Parity, SerialParams, StopBits, Target, TlsFiles};
    use crate::mock::{MockRequest, MockSession};

    fn config(data_type: &str, count: u16, values: &[f64]) -> Config {
        Config {
            mode: crate::config::Mode::Tcp,
            target: Target::Host("localhost".to_string()),
            port: 502,
            serial: SerialParams {
                baud_rate: 19200,
                data_bits: DataBits::Eight,
                stop_bits: StopBits::One,
                parity: Parity::Even,
            },
            tls: TlsFiles::default(),
            unit_id: 1,
            start_ref: 1,
            zero_based: false,
            count,
            data_type: data_type.parse().unwrap(),
            word_order: WordOrder::BigEndian,
            poll_once: true,
            poll_rate: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            verbose: false,
            write_values: values.iter().copied().map(WriteValue::new).collect(),
        }
    }

    fn run(
        config: &Config,
        session: MockSession,
    ) -> (Result<(), OperationError>, String, MockSession) {
        let operation = Operation::resolve(config).unwrap();
        let bound = BoundSession::bind(session, UnitId::new(config.unit_id), config.word_order);
        let mut dispatcher = Dispatcher::new(bound, Addressing::from_config(config), Vec::new());
        let result = tokio_test::block_on(dispatcher.execute(&operation));
        let (bound, out) = dispatcher.into_parts();
        let session = tokio_test::block_on(bound.close());
        (result, String::from_utf8(out).unwrap(), session)
    }

    #[test]
    fn selects_read_operation_by_type() {
        assert_eq!(
            Operation::resolve(&config("0", 1, &[])).unwrap(),
            Operation::Read(ReadOperation::Coils)
        );
        assert_eq!(
            Operation::resolve(&config("1", 1, &[])).unwrap(),
            Operation::Read(ReadOperation::DiscreteInputs)
        );
        assert_eq!(
            Operation::resolve(&config("3:hex", 1, &[])).unwrap(),
            Operation::Read(ReadOperation::InputRegisters(RegisterFormat::Hex))
        );
        assert_eq!(
            Operation::resolve(&config("4", 1, &[])).unwrap(),
            Operation::Read(ReadOperation::HoldingRegisters(RegisterFormat::Decimal))
        );
    }

    #[test]
    fn read_only_types_are_not_writable() {
        for data_type in ["1", "3", "3:int"] {
            let err = Operation::resolve(&config(data_type, 1, &[1.0])).unwrap_err();
            assert!(matches!(err, OperationError::NotWritable(_)));
        }
    }

    #[test]
    fn wide_writes_require_pairs() {
        let err = Operation::resolve(&config("4:int", 1, &[1.0, 2.0, 3.0])).unwrap_err();
        assert_eq!(err.to_string(), "32-bit integers require even number of values");
        let err = Operation::resolve(&config("4:float", 1, &[1.0])).unwrap_err();
        assert_eq!(err.to_string(), "32-bit floats require even number of values");
    }

    #[test]
    fn wide_reads_require_an_even_count() {
        let err = Operation::resolve(&config("3:float", 3, &[])).unwrap_err();
        assert!(matches!(err, OperationError::OddWideCount(3)));
        assert!(Operation::resolve(&config("3:float", 4, &[])).is_ok());
    }

    #[test]
    fn register_writes_reject_values_that_do_not_fit() {
        let err = Operation::resolve(&config("4", 1, &[70000.0])).unwrap_err();
        assert!(matches!(err, OperationError::WriteValue(x) if x == 70000.0));
    }

    #[test]
    fn wide_values_are_combined_by_word_order() {
        let mut little = config("4:int", 1, &[1.0, 2.0]);
        little.word_order = WordOrder::LittleEndian;
        assert_eq!(
            Operation::resolve(&config("4:int", 1, &[1.0, 2.0])).unwrap(),
            Operation::Write(WriteOperation::HoldingRegisters(RegisterValues::Int(vec![
                0x0001_0002
            ])))
        );
        assert_eq!(
            Operation::resolve(&little).unwrap(),
            Operation::Write(WriteOperation::HoldingRegisters(RegisterValues::Int(vec![
                0x0002_0001
            ])))
        );
    }

    #[test]
    fn prints_coils_as_digits() {
        let session = MockSession::new().with_coils(0, &[true, false, true]);
        let (result, out, _) = run(&config("0", 3, &[]), session);
        result.unwrap();
        assert_eq!(out, "Coils (1-3):\n[1]: 1\n[2]: 0\n[3]: 1\n");
    }

    #[test]
    fn prints_hex_annotation() {
        let session = MockSession::new().with_input_registers(0, &[0x00FF, 0xBEEF]);
        let (result, out, _) = run(&config("3:hex", 2, &[]), session);
        result.unwrap();
        assert_eq!(
            out,
            "Input Registers (1-2):\n[1]: 255 (0x00FF)\n[2]: 48879 (0xBEEF)\n"
        );
    }

    #[test]
    fn annotates_first_register_of_each_int_pair() {
        let session =
            MockSession::new().with_holding_registers(0, &[0xFFFF, 0xFFFE, 0x0001, 0xE240]);
        let (result, out, _) = run(&config("4:int", 4, &[]), session);
        result.unwrap();
        assert_eq!(
            out,
            "Holding Registers (1-4):\n\
             [1]: 65535 (-2 as 32-bit int)\n\
             [2]: 65534\n\
             [3]: 1 (123456 as 32-bit int)\n\
             [4]: 57920\n"
        );
    }

    #[test]
    fn zero_based_reference_is_the_wire_address() {
        let mut cfg = config("4", 2, &[]);
        cfg.zero_based = true;
        cfg.start_ref = 0;
        let session = MockSession::new().with_holding_registers(0, &[5, 6]);
        let (result, out, session) = run(&cfg, session);
        result.unwrap();
        assert_eq!(out, "Holding Registers (0-1):\n[0]: 5\n[1]: 6\n");
        assert_eq!(
            session.requests(),
            &[MockRequest::ReadRegisters(
                RegisterSpace::Holding,
                AddressRange::try_from(0, 2).unwrap()
            )]
        );
    }

    #[test]
    fn one_based_reference_is_shifted_on_the_wire() {
        let mut cfg = config("3", 1, &[]);
        cfg.start_ref = 100;
        let (result, out, session) = run(&cfg, MockSession::new().with_input_registers(99, &[42]));
        result.unwrap();
        assert_eq!(out, "Input Registers (100-100):\n[100]: 42\n");
        assert_eq!(
            session.requests(),
            &[MockRequest::ReadRegisters(
                RegisterSpace::Input,
                AddressRange::try_from(99, 1).unwrap()
            )]
        );
    }

    #[test]
    fn writes_coils_and_echoes_them() {
        let (result, out, session) = run(&config("0", 1, &[1.0, 0.0, 5.0]), MockSession::new());
        result.unwrap();
        assert_eq!(
            out,
            "Successfully wrote 3 coil(s) starting at address 1\n[1]: 1\n[2]: 0\n[3]: 1\n"
        );
        assert_eq!(
            session.requests(),
            &[MockRequest::WriteCoils(0, vec![true, false, true])]
        );
    }

    #[test]
    fn writes_plain_registers() {
        let (result, out, session) = run(&config("4", 1, &[123.0, 456.7]), MockSession::new());
        result.unwrap();
        assert_eq!(
            out,
            "Successfully wrote 2 16-bit register(s) starting at address 1\n[1]: 123\n[2]: 456\n"
        );
        assert_eq!(
            session.holding_registers(AddressRange::try_from(0, 2).unwrap()),
            &[123, 456]
        );
    }

    #[test]
    fn writes_float_pairs_as_given() {
        let (result, out, session) =
            run(&config("4:float", 1, &[16456.0, 62915.0]), MockSession::new());
        result.unwrap();
        assert_eq!(
            out,
            "Successfully wrote 1 32-bit float(s) starting at address 1\n[1]: 3.14\n"
        );
        assert_eq!(
            session.holding_registers(AddressRange::try_from(0, 2).unwrap()),
            &[0x4048, 0xF5C3]
        );
    }

    #[test]
    fn little_endian_int_pairs_keep_transmission_order() {
        let mut cfg = config("4:int", 1, &[1.0, 2.0, 3.0, 4.0]);
        cfg.word_order = WordOrder::LittleEndian;
        let (result, out, session) = run(&cfg, MockSession::new());
        result.unwrap();
        assert_eq!(
            out,
            "Successfully wrote 2 32-bit integer(s) starting at address 1\n\
             [1]: 131073\n\
             [3]: 262147\n"
        );
        assert_eq!(
            session.holding_registers(AddressRange::try_from(0, 4).unwrap()),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn failures_name_the_operation() {
        let (result, out, _) = run(&config("1", 1, &[]), MockSession::new().fail_after(0));
        assert_eq!(
            result.unwrap_err().to_string(),
            "failed to read discrete inputs: response timeout"
        );
        assert!(out.is_empty());
    }

    #[test]
    fn writes_past_the_address_space_are_rejected() {
        let mut cfg = config("4", 1, &[1.0, 2.0]);
        cfg.zero_based = true;
        cfg.start_ref = u16::MAX;
        let (result, _, session) = run(&cfg, MockSession::new());
        assert!(matches!(
            result,
            Err(OperationError::WriteRange { start: u16::MAX, count: 2 })
        ));
        assert!(session.requests().is_empty());
    }
}
