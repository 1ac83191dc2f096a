use std::time::Duration;

use crate::config::{DataType, Mode};

/// Errors detected while turning command-line tokens into a [`Config`](crate::Config)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Syntax error reported by the argument parser, or a help/version request
    #[error("{}", usage_summary(.0))]
    Usage(clap::Error),
    /// Neither a host nor a device was supplied
    #[error("device or host parameter missing ! Try -h for help")]
    MissingTarget,
    /// A positional write value is not a number
    #[error("invalid write value: {0}")]
    InvalidWriteValue(String),
    /// Count outside of [1, 125]
    #[error("count must be between 1 and 125 (got {0})")]
    Count(i64),
    /// Unit identifier outside of [0, 255]
    #[error("slave address must be between 0 and 255 (got {0})")]
    SlaveAddress(i64),
    /// Baud rate outside of [1200, 921600]
    #[error("baudrate must be between 1200 and 921600 (got {0})")]
    Baudrate(i64),
    /// Data bits other than 7 or 8
    #[error("databits must be 7 or 8 (got {0})")]
    Databits(i64),
    /// Stop bits other than 1 or 2
    #[error("stopbits must be 1 or 2 (got {0})")]
    Stopbits(i64),
    /// Parity other than none, even or odd
    #[error("parity must be none, even, or odd (got '{0}')")]
    Parity(String),
    /// Poll rate below 10 ms
    #[error("poll rate must be at least 10 ms (got {0} ms)")]
    PollRate(i64),
    /// Timeout outside of [0.01, 10.0] seconds
    #[error("timeout must be between 0.01 and 10.00 seconds (got {0})")]
    Timeout(f64),
    /// Start reference below the addressing base or past the end of the address space
    #[error("reference must be between {min} and {max} for a count of {count} (got {value})")]
    Reference {
        /// reference supplied by the user
        value: i64,
        /// lowest legal reference
        min: i64,
        /// highest legal reference for the count
        max: i64,
        /// number of values requested
        count: u16,
    },
    /// Unknown data type tag
    #[error("unsupported data type: {0} (supported: 0, 1, 3[:hex|:int|:float], 4[:hex|:int|:float])")]
    DataType(String),
    /// Unknown transport mode
    #[error("unsupported mode: {0} (supported: tcp, tls, udp, rtu, rtuovertcp, rtuoverudp)")]
    UnsupportedMode(String),
    /// A network mode was selected, but the target was classified as a serial device
    #[error("mode {mode} requires a host, but '{device}' was taken as a serial device (give -m before the target)")]
    HostRequired {
        /// selected mode
        mode: Mode,
        /// target that was classified as a device
        device: String,
    },
    /// The serial mode was selected, but the target was classified as a host
    #[error("mode {mode} requires a serial device, but '{host}' was taken as a host (give -m before the target)")]
    DeviceRequired {
        /// selected mode
        mode: Mode,
        /// target that was classified as a host
        host: String,
    },
    /// TLS mode without the certificate and key files
    #[error("mode tls requires --ca-cert, --cert and --key")]
    TlsFilesMissing,
}

impl ConfigError {
    /// True for help and version requests, which end the run successfully
    pub fn is_informational(&self) -> bool {
        match self {
            Self::Usage(err) => matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ),
            _ => false,
        }
    }
}

fn usage_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

/// Errors opening a session to the server
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The connection was refused, or the peer could not be reached
    #[error("failed to connect: unable to connect to {url}: {reason}")]
    Unreachable {
        /// endpoint description
        url: String,
        /// what went wrong
        reason: String,
    },
    /// No connection was established within the timeout
    #[error("failed to connect: no connection to {url} within {} ms", .timeout.as_millis())]
    Timeout {
        /// endpoint description
        url: String,
        /// connect budget
        timeout: Duration,
    },
    /// The serial port could not be opened
    #[error("failed to connect: unable to open serial port {device}: {reason}")]
    SerialPort {
        /// serial device path
        device: String,
        /// what went wrong
        reason: String,
    },
    /// The TLS configuration could not be loaded
    #[error("failed to connect: TLS configuration: {0}")]
    Tls(String),
    /// Socket-level failure
    #[error("failed to connect: {0}")]
    Io(#[from] std::io::Error),
    /// The client task shut down before the session was established
    #[error("failed to connect: channel was shut down")]
    Shutdown,
}

/// Errors from a single request on an open session
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failure reported by the rodbus channel
    #[error(transparent)]
    Request(#[from] rodbus::RequestError),
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// No response within the timeout
    #[error("response timeout")]
    Timeout,
    /// The server answered with an exception
    #[error("modbus exception: {} ({code:#04X})", exception_name(*.code))]
    Exception {
        /// raw exception code
        code: u8,
    },
    /// Failure reported by the `tokio-modbus` client
    #[error(transparent)]
    Modbus(#[from] tokio_modbus::Error),
}

fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x08 => "memory parity error",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target device failed to respond",
        _ => "unknown exception",
    }
}

/// Errors resolving or executing a read or write operation
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    /// Writes are only possible for coils and holding registers
    #[error("write operations not supported for data type: {0}")]
    NotWritable(DataType),
    /// Wide writes consume the values in pairs
    #[error("32-bit {0} require even number of values")]
    OddWriteCount(&'static str),
    /// Wide reads consume the registers in pairs
    #[error("32-bit data types require an even count (got {0})")]
    OddWideCount(u16),
    /// A value can't be narrowed to a register word
    #[error("write value {0} does not fit in a 16-bit register")]
    WriteValue(f64),
    /// The write doesn't fit in the address space or a single request
    #[error("invalid write of {count} value(s) at address {start}")]
    WriteRange {
        /// wire address of the first value
        start: u16,
        /// number of values
        count: usize,
    },
    /// The requested range is not valid
    #[error("invalid range: {0}")]
    Range(rodbus::InvalidRange),
    /// The request to the server failed
    #[error("failed to {operation}: {source}")]
    Request {
        /// name of the operation, e.g. "read holding registers"
        operation: &'static str,
        /// underlying failure
        source: TransportError,
    },
    /// Results could not be written to the output
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

/// Any error that ends a run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Session open error
    #[error(transparent)]
    Connect(#[from] ConnectError),
    /// Operation error
    #[error(transparent)]
    Operation(#[from] OperationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_is_named() {
        let err = TransportError::Exception { code: 2 };
        assert_eq!(err.to_string(), "modbus exception: illegal data address (0x02)");
    }

    #[test]
    fn failed_request_embeds_operation_name() {
        let err = OperationError::Request {
            operation: "read coils",
            source: TransportError::Timeout,
        };
        assert_eq!(err.to_string(), "failed to read coils: response timeout");
    }

    #[test]
    fn unreachable_names_the_cause() {
        let err = ConnectError::Unreachable {
            url: "127.0.0.1:1502".to_string(),
            reason: "Connection refused (os error 111)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect: unable to connect to 127.0.0.1:1502: Connection refused (os error 111)"
        );
    }
}
