use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser};

use crate::codec::WordOrder;
use crate::config::{
    Config, DataBits, DataType, Mode, Parity, SerialParams, StopBits, Target, TlsFiles,
    WriteValue,
};
use crate::error::ConfigError;

const SEPARATOR: &str = "--";

const EXAMPLES: &str = "\
EXAMPLES:
  # Read 2 holding registers starting at reference 1
  rodbus-poll -t 4 -r 1 -c 2 192.168.1.100

  # Read input registers as 32-bit floats from an RTU device
  rodbus-poll -m rtu -t 3:float -r 1 -c 2 /dev/ttyUSB0

  # Write values to holding registers
  rodbus-poll -t 4 -r 1 192.168.1.100 123 456 789

  # Write one 32-bit integer (0x0001E240 = 123456) as its two register words
  rodbus-poll -t 4:int -r 1 192.168.1.100 1 57920

  # Write coils, values after -- may start with a minus sign
  rodbus-poll -t 0 -r 1 192.168.1.100 -- 1 0 -1 1

  # Poll coils every 500 ms
  rodbus-poll -t 0 -r 1 -c 8 -l 500 192.168.1.100

  # RTU framing tunneled over TCP
  rodbus-poll -m rtuovertcp -t 4 -r 1 -c 2 192.168.1.100

  # Modbus TCP over TLS
  rodbus-poll -m tls --ca-cert ca.pem --cert client.pem --key client.key -c 2 192.168.1.100

NOTE:
  The target is classified using the mode given before it: -m must precede a serial DEVICE.";

#[derive(Debug, Parser)]
#[command(name = "rodbus-poll")]
#[command(about = "A command line Modbus polling client built on the Rodbus crate")]
#[command(version)]
#[command(after_help = EXAMPLES)]
struct Cli {
    #[arg(
        short = 'm',
        long = "mode",
        value_name = "MODE",
        action = ArgAction::Append,
        help = "Transport: tcp, tls, udp, rtu, rtuovertcp, rtuoverudp [default: tcp]"
    )]
    mode: Vec<String>,

    #[arg(
        short = 'a',
        long = "address",
        value_name = "ADDR",
        default_value = "1",
        value_parser = first_address,
        allow_negative_numbers = true,
        help = "Slave address (0-255); of a list like 1,2 the first entry is used"
    )]
    address: i64,

    #[arg(
        short = 'r',
        long = "reference",
        value_name = "REF",
        default_value_t = 1,
        allow_negative_numbers = true,
        help = "Start reference"
    )]
    reference: i64,

    #[arg(
        short = 'c',
        long = "count",
        value_name = "COUNT",
        default_value_t = 1,
        allow_negative_numbers = true,
        help = "Number of values to read (1-125)"
    )]
    count: i64,

    #[arg(
        short = 't',
        long = "type",
        value_name = "TYPE",
        default_value = "4",
        help = "Data type: 0 = coil, 1 = discrete input, 3 = input register, 4 = holding register; \
                registers accept a :hex, :int or :float suffix"
    )]
    data_type: String,

    #[arg(
        short = '0',
        long = "zero-based",
        help = "First reference is 0 (PDU addressing)"
    )]
    zero_based: bool,

    #[arg(
        short = 'B',
        long = "big-endian",
        help = "Big endian word order for 32-bit data (default)"
    )]
    big_endian: bool,

    #[arg(
        short = 'L',
        long = "little-endian",
        conflicts_with = "big_endian",
        help = "Little endian word order for 32-bit data"
    )]
    little_endian: bool,

    #[arg(
        short = '1',
        long = "once",
        help = "Poll only once, otherwise poll continuously"
    )]
    once: bool,

    #[arg(
        short = 'l',
        long = "poll-rate",
        value_name = "MS",
        default_value_t = 1000,
        allow_negative_numbers = true,
        help = "Poll rate in milliseconds"
    )]
    poll_rate: i64,

    #[arg(
        short = 'o',
        long = "timeout",
        value_name = "SEC",
        default_value_t = 1.0,
        allow_negative_numbers = true,
        help = "Timeout in seconds (0.01-10.00)"
    )]
    timeout: f64,

    #[arg(
        short = 'p',
        long = "port",
        value_name = "PORT",
        default_value_t = 502,
        help = "TCP or UDP port number"
    )]
    port: u16,

    #[arg(
        short = 'b',
        long = "baudrate",
        value_name = "RATE",
        default_value_t = 19200,
        allow_negative_numbers = true,
        help = "Baudrate (1200-921600)"
    )]
    baudrate: i64,

    #[arg(
        short = 'd',
        long = "databits",
        value_name = "BITS",
        default_value_t = 8,
        allow_negative_numbers = true,
        help = "Databits (7 or 8)"
    )]
    databits: i64,

    #[arg(
        short = 's',
        long = "stopbits",
        value_name = "BITS",
        default_value_t = 1,
        allow_negative_numbers = true,
        help = "Stopbits (1 or 2)"
    )]
    stopbits: i64,

    #[arg(
        short = 'P',
        long = "parity",
        value_name = "PARITY",
        default_value = "even",
        help = "Parity: none, even, odd"
    )]
    parity: String,

    #[arg(short = 'v', long = "verbose", help = "Verbose mode")]
    verbose: bool,

    #[arg(
        long = "ca-cert",
        value_name = "FILE",
        help = "Certificate authority used to verify the server (TLS)"
    )]
    ca_cert: Option<PathBuf>,

    #[arg(long = "cert", value_name = "FILE", help = "Client certificate (TLS)")]
    cert: Option<PathBuf>,

    #[arg(long = "key", value_name = "FILE", help = "Client private key (TLS)")]
    key: Option<PathBuf>,

    #[arg(
        long = "key-password",
        value_name = "PASSWORD",
        help = "Password of the client private key (TLS)"
    )]
    key_password: Option<String>,

    #[arg(
        value_name = "HOST|DEVICE [WRITE_VALUES]",
        help = "Host name, IP address or serial device, followed by the values to write"
    )]
    operands: Vec<String>,
}

/// Slave address lists like `1,2` are accepted, but only the first entry is polled
fn first_address(value: &str) -> Result<i64, std::num::ParseIntError> {
    value.split(',').next().unwrap_or_default().trim().parse()
}

/// Parse the command line, program name excluded, into a validated configuration
///
/// The positional target is a host or a serial device depending on the mode given *before* it;
/// a mode given after the target applies to the transport only. Tokens after a literal `--` are
/// always write values.
pub fn parse<I, T>(tokens: I) -> Result<Config, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let tokens: Vec<OsString> = tokens.into_iter().map(Into::into).collect();
    let (options, trailing) = match tokens.iter().position(|x| x == SEPARATOR) {
        Some(pos) => (&tokens[..pos], &tokens[pos + 1..]),
        None => (&tokens[..], &tokens[tokens.len()..]),
    };

    let args = std::iter::once(OsString::from("rodbus-poll")).chain(options.iter().cloned());
    let matches = Cli::command()
        .try_get_matches_from(args)
        .map_err(ConfigError::Usage)?;
    let cli = Cli::from_arg_matches(&matches).map_err(ConfigError::Usage)?;

    let trailing = trailing.iter().map(|x| x.to_string_lossy().into_owned());
    let mut operands = cli.operands.iter().cloned().chain(trailing);
    // values after the separator never become the target
    let target = if cli.operands.is_empty() {
        None
    } else {
        operands.next()
    };

    let write_values = operands
        .map(|token| token.parse::<WriteValue>())
        .collect::<Result<Vec<_>, _>>()?;

    let target = match target {
        Some(target) => classify(&target, mode_at_target(&matches, &cli.mode)),
        None => return Err(ConfigError::MissingTarget),
    };

    validate(cli, target, write_values)
}

/// The mode in effect when the target was parsed, i.e. the last one given before it
fn mode_at_target<'a>(matches: &ArgMatches, modes: &'a [String]) -> &'a str {
    let target_index = matches.index_of("operands").unwrap_or(usize::MAX);
    matches
        .indices_of("mode")
        .into_iter()
        .flatten()
        .zip(modes)
        .filter(|(index, _)| *index < target_index)
        .map(|(_, mode)| mode.as_str())
        .last()
        .unwrap_or(Mode::Tcp.as_str())
}

fn classify(target: &str, mode: &str) -> Target {
    let is_network = mode.parse::<Mode>().map_or(true, Mode::is_network);
    if is_network {
        Target::Host(target.to_string())
    } else {
        Target::Device(target.to_string())
    }
}

fn validate(
    cli: Cli,
    target: Target,
    write_values: Vec<WriteValue>,
) -> Result<Config, ConfigError> {
    let count = u16::try_from(cli.count)
        .ok()
        .filter(|x| (1..=125).contains(x))
        .ok_or(ConfigError::Count(cli.count))?;

    let unit_id = u8::try_from(cli.address).map_err(|_| ConfigError::SlaveAddress(cli.address))?;

    let baud_rate = u32::try_from(cli.baudrate)
        .ok()
        .filter(|x| (1200..=921_600).contains(x))
        .ok_or(ConfigError::Baudrate(cli.baudrate))?;

    let data_bits = match cli.databits {
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        other => return Err(ConfigError::Databits(other)),
    };

    let stop_bits = match cli.stopbits {
        1 => StopBits::One,
        2 => StopBits::Two,
        other => return Err(ConfigError::Stopbits(other)),
    };

    let parity: Parity = cli.parity.parse()?;

    let poll_rate = u64::try_from(cli.poll_rate)
        .ok()
        .filter(|x| *x >= 10)
        .map(Duration::from_millis)
        .ok_or(ConfigError::PollRate(cli.poll_rate))?;

    // also rejects NaN
    if !(0.01..=10.0).contains(&cli.timeout) {
        return Err(ConfigError::Timeout(cli.timeout));
    }
    let timeout = Duration::from_secs_f64(cli.timeout);

    let start_ref = validate_reference(cli.reference, cli.zero_based, count)?;
    let data_type: DataType = cli.data_type.parse()?;
    let mode: Mode = cli
        .mode
        .last()
        .map_or(Ok(Mode::Tcp), |mode| mode.parse())?;

    Ok(Config {
        mode,
        target,
        port: cli.port,
        serial: SerialParams {
            baud_rate,
            data_bits,
            stop_bits,
            parity,
        },
        tls: TlsFiles {
            ca_cert: cli.ca_cert,
            cert: cli.cert,
            key: cli.key,
            key_password: cli.key_password,
        },
        unit_id,
        start_ref,
        zero_based: cli.zero_based,
        count,
        data_type,
        word_order: WordOrder::from_big_endian(!cli.little_endian),
        poll_once: cli.once,
        poll_rate,
        timeout,
        verbose: cli.verbose,
        write_values,
    })
}

/// The wire range `[reference - base, reference - base + count)` must fit the 16-bit address space
fn validate_reference(value: i64, zero_based: bool, count: u16) -> Result<u16, ConfigError> {
    let min = if zero_based { 0 } else { 1 };
    let max = (65_536 - i64::from(count) + min).min(i64::from(u16::MAX));
    u16::try_from(value)
        .ok()
        .filter(|_| (min..=max).contains(&value))
        .ok_or(ConfigError::Reference {
            value,
            min,
            max,
            count,
        })
}
