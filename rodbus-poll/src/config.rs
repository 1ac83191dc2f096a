use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::codec::WordOrder;
use crate::error::{ConfigError, OperationError};

/// Transport used to reach the server
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Modbus TCP
    Tcp,
    /// Modbus TCP secured with TLS
    Tls,
    /// Modbus TCP framing over UDP datagrams
    Udp,
    /// Modbus RTU on a serial line
    Rtu,
    /// Modbus RTU framing tunneled over a TCP connection
    RtuOverTcp,
    /// Modbus RTU framing tunneled over UDP datagrams
    RtuOverUdp,
}

impl Mode {
    /// All supported modes, in the order they are listed to users
    pub const ALL: [Mode; 6] = [
        Mode::Tcp,
        Mode::Tls,
        Mode::Udp,
        Mode::Rtu,
        Mode::RtuOverTcp,
        Mode::RtuOverUdp,
    ];

    /// True if the target of this mode is a host, false if it is a serial device
    pub fn is_network(self) -> bool {
        match self {
            Mode::Tcp | Mode::Tls | Mode::Udp | Mode::RtuOverTcp | Mode::RtuOverUdp => true,
            Mode::Rtu => false,
        }
    }

    /// Name used on the command line
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Tcp => "tcp",
            Mode::Tls => "tls",
            Mode::Udp => "udp",
            Mode::Rtu => "rtu",
            Mode::RtuOverTcp => "rtuovertcp",
            Mode::RtuOverUdp => "rtuoverudp",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| ConfigError::UnsupportedMode(s.to_string()))
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the values of 16-bit registers are rendered and written
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegisterFormat {
    /// Plain 16-bit decimal
    Decimal,
    /// 16-bit decimal with a 4-digit hex annotation
    Hex,
    /// 32-bit signed integer spanning two registers
    Int,
    /// 32-bit IEEE-754 float spanning two registers
    Float,
}

impl RegisterFormat {
    /// True if values span two registers
    pub fn is_wide(self) -> bool {
        matches!(self, RegisterFormat::Int | RegisterFormat::Float)
    }

    fn suffix(self) -> Option<&'static str> {
        match self {
            RegisterFormat::Decimal => None,
            RegisterFormat::Hex => Some("hex"),
            RegisterFormat::Int => Some("int"),
            RegisterFormat::Float => Some("float"),
        }
    }
}

/// Data type selected with `-t`: an address space and, for registers, a format
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataType {
    /// `0`: coils
    Coil,
    /// `1`: discrete inputs
    DiscreteInput,
    /// `3[:fmt]`: input registers
    InputRegister(RegisterFormat),
    /// `4[:fmt]`: holding registers
    HoldingRegister(RegisterFormat),
}

impl DataType {
    /// Label of the address space used in output headers
    pub fn label(self) -> &'static str {
        match self {
            DataType::Coil => "Coils",
            DataType::DiscreteInput => "Discrete Inputs",
            DataType::InputRegister(_) => "Input Registers",
            DataType::HoldingRegister(_) => "Holding Registers",
        }
    }

    /// Register format, or `None` for the bit spaces
    pub fn format(self) -> Option<RegisterFormat> {
        match self {
            DataType::Coil | DataType::DiscreteInput => None,
            DataType::InputRegister(format) | DataType::HoldingRegister(format) => Some(format),
        }
    }

    /// True for the 32-bit register formats
    pub fn is_wide(self) -> bool {
        self.format().is_some_and(RegisterFormat::is_wide)
    }

    fn prefix(self) -> char {
        match self {
            DataType::Coil => '0',
            DataType::DiscreteInput => '1',
            DataType::InputRegister(_) => '3',
            DataType::HoldingRegister(_) => '4',
        }
    }
}

impl FromStr for DataType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, suffix) = match s.split_once(':') {
            Some((prefix, suffix)) => (prefix, Some(suffix)),
            None => (s, None),
        };

        let format = match suffix {
            None => RegisterFormat::Decimal,
            Some("hex") => RegisterFormat::Hex,
            Some("int") => RegisterFormat::Int,
            Some("float") => RegisterFormat::Float,
            Some(_) => return Err(ConfigError::DataType(s.to_string())),
        };

        match (prefix, suffix) {
            ("0", None) => Ok(DataType::Coil),
            ("1", None) => Ok(DataType::DiscreteInput),
            ("3", _) => Ok(DataType::InputRegister(format)),
            ("4", _) => Ok(DataType::HoldingRegister(format)),
            _ => Err(ConfigError::DataType(s.to_string())),
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.format().and_then(RegisterFormat::suffix) {
            Some(suffix) => write!(f, "{}:{}", self.prefix(), suffix),
            None => write!(f, "{}", self.prefix()),
        }
    }
}

/// Serial parity
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    /// no parity bit
    None,
    /// even parity
    Even,
    /// odd parity
    Odd,
}

impl Parity {
    /// Single letter used in line settings such as `19200-8E1`
    pub fn letter(self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        }
    }
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Parity::None),
            "even" => Ok(Parity::Even),
            "odd" => Ok(Parity::Odd),
            _ => Err(ConfigError::Parity(s.to_string())),
        }
    }
}

/// Number of data bits per character
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataBits {
    /// 7 bits
    Seven,
    /// 8 bits
    Eight,
}

/// Number of stop bits per character
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    /// 1 bit
    One,
    /// 2 bits
    Two,
}

/// Serial line settings
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SerialParams {
    /// bits per second
    pub baud_rate: u32,
    /// data bits
    pub data_bits: DataBits,
    /// stop bits
    pub stop_bits: StopBits,
    /// parity
    pub parity: Parity,
}

impl Display for SerialParams {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let data_bits = match self.data_bits {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let stop_bits = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(
            f,
            "{}-{}{}{}",
            self.baud_rate,
            data_bits,
            self.parity.letter(),
            stop_bits
        )
    }
}

/// The positional target, classified by the mode in effect when it was parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// host name or IP address
    Host(String),
    /// serial device path
    Device(String),
}

/// Paths of the PEM files used in TLS mode
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsFiles {
    /// certificate authority used to verify the server
    pub ca_cert: Option<PathBuf>,
    /// client certificate
    pub cert: Option<PathBuf>,
    /// client private key
    pub key: Option<PathBuf>,
    /// password of the private key
    pub key_password: Option<String>,
}

/// A numeric token to be written, narrowed once the data type is known
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WriteValue(f64);

impl WriteValue {
    /// Create a write value from a parsed number
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// The value as parsed
    pub fn get(self) -> f64 {
        self.0
    }

    /// Narrow to a register word, truncating any fraction
    pub fn to_word(self) -> Result<u16, OperationError> {
        let truncated = self.0.trunc();
        if truncated.is_finite() && (0.0..=f64::from(u16::MAX)).contains(&truncated) {
            Ok(truncated as u16)
        } else {
            Err(OperationError::WriteValue(self.0))
        }
    }

    /// Coil state: any non-zero value is on
    pub fn to_coil(self) -> bool {
        self.0 != 0.0
    }
}

impl FromStr for WriteValue {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<f64>()
            .map(WriteValue)
            .map_err(|_| ConfigError::InvalidWriteValue(s.to_string()))
    }
}

/// Fully validated configuration of a run
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// transport
    pub mode: Mode,
    /// host or device
    pub target: Target,
    /// TCP/UDP port
    pub port: u16,
    /// serial line settings, also used for RTU-over-socket timing
    pub serial: SerialParams,
    /// TLS files
    pub tls: TlsFiles,
    /// unit identifier
    pub unit_id: u8,
    /// first reference as given by the user
    pub start_ref: u16,
    /// true if `start_ref` is a PDU address rather than a 1-based reference
    pub zero_based: bool,
    /// number of values to read
    pub count: u16,
    /// address space and format
    pub data_type: DataType,
    /// word order of 32-bit values
    pub word_order: WordOrder,
    /// read only once instead of polling
    pub poll_once: bool,
    /// delay between reads when polling
    pub poll_rate: Duration,
    /// per request timeout
    pub timeout: Duration,
    /// verbose output
    pub verbose: bool,
    /// values to write; empty for reads
    pub write_values: Vec<WriteValue>,
}

impl Config {
    /// Address of the first value on the wire
    pub fn wire_start(&self) -> u16 {
        if self.zero_based {
            self.start_ref
        } else {
            self.start_ref.saturating_sub(1)
        }
    }

    /// True if the run writes values instead of reading them
    pub fn is_write(&self) -> bool {
        !self.write_values.is_empty()
    }

    /// Human readable summary printed in verbose mode
    pub fn summary(&self) -> String {
        let target = match &self.target {
            Target::Host(host) => format!("{host}:{}", self.port),
            Target::Device(device) => device.clone(),
        };
        format!(
            "Protocol configuration: Modbus {}\n\
             Slave configuration...: address = [{}]\n\
             Data type.............: {} ({})\n\
             Communication.........: {}, {}\n\
             Timeout...............: {:.2} s\n\
             Poll rate.............: {} ms\n",
            self.mode.as_str().to_uppercase(),
            self.unit_id,
            self.data_type,
            self.word_order,
            target,
            self.serial,
            self.timeout.as_secs_f64(),
            self.poll_rate.as_millis(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_modes() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert!(matches!(
            "modbus".parse::<Mode>(),
            Err(ConfigError::UnsupportedMode(x)) if x == "modbus"
        ));
    }

    #[test]
    fn unsupported_mode_lists_all_modes() {
        let err = "serial".parse::<Mode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported mode: serial (supported: tcp, tls, udp, rtu, rtuovertcp, rtuoverudp)"
        );
    }

    #[test]
    fn only_rtu_is_serial() {
        let serial: Vec<Mode> = Mode::ALL.into_iter().filter(|m| !m.is_network()).collect();
        assert_eq!(serial, vec![Mode::Rtu]);
    }

    #[test]
    fn parses_register_types_with_suffixes() {
        assert_eq!(
            "3".parse::<DataType>().unwrap(),
            DataType::InputRegister(RegisterFormat::Decimal)
        );
        assert_eq!(
            "3:hex".parse::<DataType>().unwrap(),
            DataType::InputRegister(RegisterFormat::Hex)
        );
        assert_eq!(
            "4:int".parse::<DataType>().unwrap(),
            DataType::HoldingRegister(RegisterFormat::Int)
        );
        assert_eq!(
            "4:float".parse::<DataType>().unwrap(),
            DataType::HoldingRegister(RegisterFormat::Float)
        );
    }

    #[test]
    fn bit_types_reject_suffixes() {
        assert_eq!("0".parse::<DataType>().unwrap(), DataType::Coil);
        assert_eq!("1".parse::<DataType>().unwrap(), DataType::DiscreteInput);
        assert!("0:hex".parse::<DataType>().is_err());
        assert!("1:int".parse::<DataType>().is_err());
    }

    #[test]
    fn rejects_unknown_types() {
        assert!("2".parse::<DataType>().is_err());
        assert!("4:double".parse::<DataType>().is_err());
        assert!("4:".parse::<DataType>().is_err());
        assert!("".parse::<DataType>().is_err());
    }

    #[test]
    fn data_type_displays_as_tag() {
        for tag in ["0", "1", "3", "3:hex", "4:int", "4:float"] {
            assert_eq!(tag.parse::<DataType>().unwrap().to_string(), tag);
        }
    }

    #[test]
    fn wide_types() {
        assert!("3:int".parse::<DataType>().unwrap().is_wide());
        assert!("4:float".parse::<DataType>().unwrap().is_wide());
        assert!(!"4:hex".parse::<DataType>().unwrap().is_wide());
        assert!(!DataType::Coil.is_wide());
    }

    #[test]
    fn parity_message_is_specific() {
        let err = "mark".parse::<Parity>().unwrap_err();
        assert_eq!(err.to_string(), "parity must be none, even, or odd (got 'mark')");
    }

    #[test]
    fn serial_params_display_as_line_settings() {
        let params = SerialParams {
            baud_rate: 19200,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::Even,
        };
        assert_eq!(params.to_string(), "19200-8E1");
    }

    #[test]
    fn words_are_truncated() {
        assert_eq!(WriteValue::new(123.9).to_word().unwrap(), 123);
        assert_eq!(WriteValue::new(65535.0).to_word().unwrap(), 65535);
        assert_eq!(WriteValue::new(-0.5).to_word().unwrap(), 0);
    }

    #[test]
    fn words_out_of_range_are_rejected() {
        assert!(WriteValue::new(65536.0).to_word().is_err());
        assert!(WriteValue::new(-1.0).to_word().is_err());
        assert!(WriteValue::new(f64::NAN).to_word().is_err());
        assert!(WriteValue::new(f64::INFINITY).to_word().is_err());
    }

    #[test]
    fn non_zero_is_an_active_coil() {
        assert!(WriteValue::new(1.0).to_coil());
        assert!(WriteValue::new(-3.0).to_coil());
        assert!(!WriteValue::new(0.0).to_coil());
    }

    #[test]
    fn write_value_rejects_text() {
        assert!(matches!(
            "abc".parse::<WriteValue>(),
            Err(ConfigError::InvalidWriteValue(x)) if x == "abc"
        ));
    }
}
