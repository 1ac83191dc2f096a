use std::fmt::Debug;
use std::net::IpAddr;
use std::time::Duration;

use rodbus::client::*;
use rodbus::*;
use tokio::sync::mpsc;

use super::TlsCredentials;
use crate::config::{self, SerialParams};
use crate::error::{ConnectError, TransportError};
use crate::session::{RegisterSpace, Session};

/// Forwards state changes of the client task to the session being opened
struct StateListener<T> {
    tx: mpsc::Sender<T>,
}

impl<T> StateListener<T> {
    fn create() -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

impl<T: Send + 'static> Listener<T> for StateListener<T> {
    fn update(&mut self, state: T) -> MaybeAsync<()> {
        let tx = self.tx.clone();
        let future = async move {
            let _ = tx.try_send(state);
        };
        MaybeAsync::asynchronous(future)
    }
}

/// Session backed by a `rodbus` client channel (Modbus TCP, TLS and serial RTU)
pub struct ChannelSession {
    channel: Channel,
    param: RequestParam,
    timeout: Duration,
}

fn host_addr(host: &str, port: u16) -> HostAddr {
    match host.parse::<IpAddr>() {
        Ok(ip) => HostAddr::ip(ip, port),
        Err(_) => HostAddr::dns(host.to_string(), port),
    }
}

fn decode_level(verbose: bool) -> DecodeLevel {
    if verbose {
        AppDecodeLevel::DataValues.into()
    } else {
        DecodeLevel::default()
    }
}

fn serial_settings(params: &SerialParams) -> SerialSettings {
    SerialSettings {
        baud_rate: params.baud_rate,
        data_bits: match params.data_bits {
            config::DataBits::Seven => rodbus::DataBits::Seven,
            config::DataBits::Eight => rodbus::DataBits::Eight,
        },
        flow_control: FlowControl::None,
        stop_bits: match params.stop_bits {
            config::StopBits::One => rodbus::StopBits::One,
            config::StopBits::Two => rodbus::StopBits::Two,
        },
        parity: match params.parity {
            config::Parity::None => rodbus::Parity::None,
            config::Parity::Even => rodbus::Parity::Even,
            config::Parity::Odd => rodbus::Parity::Odd,
        },
    }
}

/// Wait until `check` decides the fate of the connection, or the timeout elapses
async fn await_state<T, F>(
    rx: &mut mpsc::Receiver<T>,
    url: &str,
    timeout: Duration,
    check: F,
) -> Result<(), ConnectError>
where
    T: Debug,
    F: Fn(&T) -> Option<Result<(), ConnectError>>,
{
    let wait = async {
        loop {
            let state = rx.recv().await.ok_or(ConnectError::Shutdown)?;
            tracing::info!("state: {state:?}");
            if let Some(result) = check(&state) {
                return result;
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| ConnectError::Timeout {
            url: url.to_string(),
            timeout,
        })?
}

impl ChannelSession {
    /// Open a Modbus TCP session, secured with TLS when credentials are given
    pub async fn open_tcp(
        host: &str,
        port: u16,
        tls: Option<&TlsCredentials>,
        timeout: Duration,
        verbose: bool,
    ) -> Result<Self, ConnectError> {
        let url = format!("{host}:{port}");
        let (listener, mut rx) = StateListener::create();

        let channel = match tls {
            None => spawn_tcp_client_task(
                host_addr(host, port),
                1,
                default_retry_strategy(),
                decode_level(verbose),
                Some(Box::new(listener)),
            ),
            Some(credentials) => {
                let tls_config = TlsClientConfig::full_pki(
                    Some(host.to_string()),
                    &credentials.ca_cert,
                    &credentials.cert,
                    &credentials.key,
                    credentials.key_password.as_deref(),
                    MinTlsVersion::V1_2,
                )
                .map_err(|err| ConnectError::Tls(err.to_string()))?;
                spawn_tls_client_task(
                    host_addr(host, port),
                    1,
                    default_retry_strategy(),
                    tls_config,
                    decode_level(verbose),
                    Some(Box::new(listener)),
                )
            }
        };

        let check = |state: &ClientState| match state {
            ClientState::Disabled | ClientState::Connecting => None,
            ClientState::Connected => Some(Ok(())),
            ClientState::Shutdown => Some(Err(ConnectError::Shutdown)),
            ClientState::WaitAfterFailedConnect(_) => Some(Err(ConnectError::Unreachable {
                url: url.clone(),
                reason: "connection refused or host unreachable".to_string(),
            })),
            ClientState::WaitAfterDisconnect(_) => Some(Err(ConnectError::Unreachable {
                url: url.clone(),
                reason: "connection closed by the server".to_string(),
            })),
        };

        Self::enable(channel, &mut rx, &url, timeout, check).await
    }

    /// Open a Modbus RTU session on a serial port
    pub async fn open_rtu(
        device: &str,
        serial: &SerialParams,
        timeout: Duration,
        verbose: bool,
    ) -> Result<Self, ConnectError> {
        let (listener, mut rx) = StateListener::create();

        let channel = spawn_rtu_client_task(
            device,
            serial_settings(serial),
            1,
            default_retry_strategy(),
            decode_level(verbose),
            Some(Box::new(listener)),
        );

        let check = |state: &PortState| match state {
            PortState::Disabled => None,
            PortState::Open => Some(Ok(())),
            PortState::Shutdown => Some(Err(ConnectError::Shutdown)),
            PortState::Wait(_) => Some(Err(ConnectError::SerialPort {
                device: device.to_string(),
                reason: "port could not be opened".to_string(),
            })),
        };

        Self::enable(channel, &mut rx, device, timeout, check).await
    }

    async fn enable<T, F>(
        channel: Channel,
        rx: &mut mpsc::Receiver<T>,
        url: &str,
        timeout: Duration,
        check: F,
    ) -> Result<Self, ConnectError>
    where
        T: Debug,
        F: Fn(&T) -> Option<Result<(), ConnectError>>,
    {
        channel.enable().await.map_err(|_| ConnectError::Shutdown)?;

        if let Err(err) = await_state(rx, url, timeout, check).await {
            // stop the retries of the client task
            let _ = channel.disable().await;
            return Err(err);
        }

        Ok(Self {
            channel,
            param: RequestParam::new(UnitId::new(1), timeout),
            timeout,
        })
    }
}

fn values<T>(indexed: Vec<Indexed<T>>) -> Vec<T> {
    indexed.into_iter().map(|x| x.value).collect()
}

impl Session for ChannelSession {
    fn set_unit_id(&mut self, unit_id: UnitId) {
        self.param = RequestParam::new(unit_id, self.timeout);
    }

    async fn read_coils(&mut self, range: AddressRange) -> Result<Vec<bool>, TransportError> {
        Ok(values(self.channel.read_coils(self.param, range).await?))
    }

    async fn read_discrete_inputs(
        &mut self,
        range: AddressRange,
    ) -> Result<Vec<bool>, TransportError> {
        Ok(values(
            self.channel.read_discrete_inputs(self.param, range).await?,
        ))
    }

    async fn read_registers(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<u16>, TransportError> {
        let registers = match space {
            RegisterSpace::Input => self.channel.read_input_registers(self.param, range).await?,
            RegisterSpace::Holding => {
                self.channel
                    .read_holding_registers(self.param, range)
                    .await?
            }
        };
        Ok(values(registers))
    }

    async fn write_coils(&mut self, start: u16, values: Vec<bool>) -> Result<(), TransportError> {
        let write_multiple = WriteMultiple::from(start, values).map_err(RequestError::from)?;
        self.channel
            .write_multiple_coils(self.param, write_multiple)
            .await?;
        Ok(())
    }

    async fn write_registers(
        &mut self,
        start: u16,
        values: Vec<u16>,
    ) -> Result<(), TransportError> {
        let write_multiple = WriteMultiple::from(start, values).map_err(RequestError::from)?;
        self.channel
            .write_multiple_registers(self.param, write_multiple)
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        if self.channel.disable().await.is_err() {
            tracing::debug!("channel was already shut down");
        }
    }
}
