//! Selection and opening of the transport named by the configuration
//!
//! Modbus TCP, TLS and serial RTU run on the client channels of `rodbus`. MBAP over UDP and RTU
//! framing over TCP or UDP sockets run on a `tokio-modbus` client context ([`SocketSession`]).

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;

use rodbus::{AddressRange, UnitId};

use crate::config::{Config, Mode, SerialParams, Target};
use crate::error::{ConfigError, ConnectError, TransportError};
use crate::session::{RegisterSpace, Session};

pub use channel::ChannelSession;
pub use socket::SocketSession;

mod channel;
mod socket;

/// Files used to authenticate a TLS session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsCredentials {
    /// authority used to verify the server certificate
    pub ca_cert: PathBuf,
    /// client certificate
    pub cert: PathBuf,
    /// private key of the client certificate
    pub key: PathBuf,
    /// password of an encrypted private key
    pub key_password: Option<String>,
}

/// Where and how to reach the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Modbus TCP
    Tcp {
        /// host name or IP address
        host: String,
        /// TCP port
        port: u16,
    },
    /// Modbus TCP over TLS
    Tls {
        /// host name or IP address, also the expected server name
        host: String,
        /// TCP port
        port: u16,
        /// certificate and key files
        credentials: TlsCredentials,
    },
    /// MBAP framing over UDP
    Udp {
        /// host name or IP address
        host: String,
        /// UDP port
        port: u16,
    },
    /// Modbus RTU on a serial line
    Rtu {
        /// serial device path
        device: String,
        /// line settings
        serial: SerialParams,
    },
    /// RTU framing over a TCP connection
    RtuOverTcp {
        /// host name or IP address
        host: String,
        /// TCP port
        port: u16,
        /// baud rate of the serial line behind the gateway, used for frame timing
        baud_rate: u32,
    },
    /// RTU framing over UDP
    RtuOverUdp {
        /// host name or IP address
        host: String,
        /// UDP port
        port: u16,
        /// baud rate of the serial line behind the gateway, used for frame timing
        baud_rate: u32,
    },
}

impl Endpoint {
    /// Mode this endpoint was built for
    pub fn mode(&self) -> Mode {
        match self {
            Endpoint::Tcp { .. } => Mode::Tcp,
            Endpoint::Tls { .. } => Mode::Tls,
            Endpoint::Udp { .. } => Mode::Udp,
            Endpoint::Rtu { .. } => Mode::Rtu,
            Endpoint::RtuOverTcp { .. } => Mode::RtuOverTcp,
            Endpoint::RtuOverUdp { .. } => Mode::RtuOverUdp,
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp { host, port }
            | Endpoint::Tls { host, port, .. }
            | Endpoint::Udp { host, port }
            | Endpoint::RtuOverTcp { host, port, .. }
            | Endpoint::RtuOverUdp { host, port, .. } => {
                write!(f, "{}://{}:{}", self.mode(), host, port)
            }
            Endpoint::Rtu { device, .. } => write!(f, "rtu://{device}"),
        }
    }
}

/// Transport descriptor derived from a validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// endpoint of the server
    pub endpoint: Endpoint,
    /// connect budget and per-request response timeout
    pub timeout: Duration,
    /// decode frames in the log
    pub verbose: bool,
}

impl TransportConfig {
    /// Map the mode and target of a configuration to a transport descriptor
    pub fn select(config: &Config) -> Result<Self, ConfigError> {
        let endpoint = match (config.mode, &config.target) {
            (Mode::Rtu, Target::Device(device)) => Endpoint::Rtu {
                device: device.clone(),
                serial: config.serial,
            },
            (Mode::Rtu, Target::Host(host)) => {
                return Err(ConfigError::DeviceRequired {
                    mode: Mode::Rtu,
                    host: host.clone(),
                })
            }
            (mode, Target::Device(device)) => {
                return Err(ConfigError::HostRequired {
                    mode,
                    device: device.clone(),
                })
            }
            (mode, Target::Host(host)) => {
                let host = host.clone();
                let port = config.port;
                match mode {
                    Mode::Tcp => Endpoint::Tcp { host, port },
                    Mode::Tls => Endpoint::Tls {
                        host,
                        port,
                        credentials: tls_credentials(config)?,
                    },
                    Mode::Udp => Endpoint::Udp { host, port },
                    Mode::RtuOverTcp => Endpoint::RtuOverTcp {
                        host,
                        port,
                        baud_rate: config.serial.baud_rate,
                    },
                    Mode::RtuOverUdp => Endpoint::RtuOverUdp {
                        host,
                        port,
                        baud_rate: config.serial.baud_rate,
                    },
                    Mode::Rtu => return Err(ConfigError::DeviceRequired { mode, host }),
                }
            }
        };

        Ok(Self {
            endpoint,
            timeout: config.timeout,
            verbose: config.verbose,
        })
    }

    /// URL-like description of the endpoint
    pub fn url(&self) -> String {
        self.endpoint.to_string()
    }

    /// Open a session to the endpoint
    pub async fn open(&self) -> Result<AnySession, ConnectError> {
        tracing::info!("opening {}", self.endpoint);
        let session = match &self.endpoint {
            Endpoint::Tcp { host, port } => AnySession::Channel(
                ChannelSession::open_tcp(host, *port, None, self.timeout, self.verbose).await?,
            ),
            Endpoint::Tls {
                host,
                port,
                credentials,
            } => AnySession::Channel(
                ChannelSession::open_tcp(
                    host,
                    *port,
                    Some(credentials),
                    self.timeout,
                    self.verbose,
                )
                .await?,
            ),
            Endpoint::Rtu { device, serial } => AnySession::Channel(
                ChannelSession::open_rtu(device, serial, self.timeout, self.verbose).await?,
            ),
            Endpoint::Udp { host, port } => {
                AnySession::Socket(SocketSession::connect_udp(host, *port, self.timeout).await?)
            }
            Endpoint::RtuOverTcp {
                host,
                port,
                baud_rate,
            } => AnySession::Socket(
                SocketSession::connect_rtu_over_tcp(host, *port, *baud_rate, self.timeout).await?,
            ),
            Endpoint::RtuOverUdp {
                host,
                port,
                baud_rate,
            } => AnySession::Socket(
                SocketSession::connect_rtu_over_udp(host, *port, *baud_rate, self.timeout).await?,
            ),
        };
        Ok(session)
    }
}

fn tls_credentials(config: &Config) -> Result<TlsCredentials, ConfigError> {
    match (&config.tls.ca_cert, &config.tls.cert, &config.tls.key) {
        (Some(ca_cert), Some(cert), Some(key)) => Ok(TlsCredentials {
            ca_cert: ca_cert.clone(),
            cert: cert.clone(),
            key: key.clone(),
            key_password: config.tls.key_password.clone(),
        }),
        _ => Err(ConfigError::TlsFilesMissing),
    }
}

/// Any of the sessions a [`TransportConfig`] can open
pub enum AnySession {
    /// session on a `rodbus` client channel
    Channel(ChannelSession),
    /// session on a `tokio-modbus` client context
    Socket(SocketSession),
}

impl Session for AnySession {
    fn set_unit_id(&mut self, unit_id: UnitId) {
        match self {
            AnySession::Channel(session) => session.set_unit_id(unit_id),
            AnySession::Socket(session) => session.set_unit_id(unit_id),
        }
    }

    async fn read_coils(&mut self, range: AddressRange) -> Result<Vec<bool>, TransportError> {
        match self {
            AnySession::Channel(session) => session.read_coils(range).await,
            AnySession::Socket(session) => session.read_coils(range).await,
        }
    }

    async fn read_discrete_inputs(
        &mut self,
        range: AddressRange,
    ) -> Result<Vec<bool>, TransportError> {
        match self {
            AnySession::Channel(session) => session.read_discrete_inputs(range).await,
            AnySession::Socket(session) => session.read_discrete_inputs(range).await,
        }
    }

    async fn read_registers(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<u16>, TransportError> {
        match self {
            AnySession::Channel(session) => session.read_registers(space, range).await,
            AnySession::Socket(session) => session.read_registers(space, range).await,
        }
    }

    async fn write_coils(&mut self, start: u16, values: Vec<bool>) -> Result<(), TransportError> {
        match self {
            AnySession::Channel(session) => session.write_coils(start, values).await,
            AnySession::Socket(session) => session.write_coils(start, values).await,
        }
    }

    async fn write_registers(
        &mut self,
        start: u16,
        values: Vec<u16>,
    ) -> Result<(), TransportError> {
        match self {
            AnySession::Channel(session) => session.write_registers(start, values).await,
            AnySession::Socket(session) => session.write_registers(start, values).await,
        }
    }

    async fn close(&mut self) {
        match self {
            AnySession::Channel(session) => session.close().await,
            AnySession::Socket(session) => session.close().await,
        }
    }
}
