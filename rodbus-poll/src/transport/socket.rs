use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{self, ready, Poll};
use std::time::Duration;

use rodbus::{AddressRange, UnitId};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};
use tokio_modbus::client::{self as modbus, rtu, tcp, Client, Reader, Writer};
use tokio_modbus::prelude::SlaveContext;
use tokio_modbus::Slave;

use crate::error::{ConnectError, TransportError};
use crate::session::{RegisterSpace, Session};

/// Inter-frame gap for RTU framing: 3.5 characters of 11 bits, fixed at 1.75 ms above 19200 baud
pub(crate) fn rtu_frame_delay(baud_rate: u32) -> Duration {
    if baud_rate > 19200 {
        Duration::from_micros(1750)
    } else {
        Duration::from_micros(38_500_000 / u64::from(baud_rate.max(1)))
    }
}

/// A connected UDP socket read and written as a stream, one datagram per frame
///
/// With MBAP framing, datagrams whose transaction id doesn't match the last request are
/// dropped: they answer a request that already timed out.
#[derive(Debug)]
struct Datagrams {
    socket: UdpSocket,
    mbap: bool,
    sent: Option<[u8; 2]>,
}

impl AsyncRead for Datagrams {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = buf.filled().len();
        loop {
            ready!(this.socket.poll_recv(cx, buf))?;
            let stale = match (this.sent, buf.filled().get(start..start + 2)) {
                (Some(sent), Some(received)) => received != sent.as_slice(),
                // an empty datagram would read as end of stream
                _ => buf.filled().len() == start,
            };
            if !stale {
                return Poll::Ready(Ok(()));
            }
            tracing::debug!("discarding datagram {:02X?}", &buf.filled()[start..]);
            buf.set_filled(start);
        }
    }
}

impl AsyncWrite for Datagrams {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let sent = ready!(this.socket.poll_send(cx, buf))?;
        if this.mbap && buf.len() >= 2 {
            this.sent = Some([buf[0], buf[1]]);
        }
        Poll::Ready(Ok(sent))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut task::Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[derive(Copy, Clone)]
struct Timing {
    timeout: Duration,
    frame_delay: Option<Duration>,
}

/// Session on a `tokio-modbus` client context: MBAP over UDP, and RTU framing tunneled over
/// TCP or UDP
pub struct SocketSession {
    context: modbus::Context,
    timing: Timing,
}

impl SocketSession {
    /// MBAP framing over UDP
    pub async fn connect_udp(
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let socket = connect_datagrams(host, port, true, timeout).await?;
        Ok(Self::new(tcp::attach_slave(socket, Slave(1)), timeout, None))
    }

    /// RTU framing over a TCP connection to a gateway
    pub async fn connect_rtu_over_tcp(
        host: &str,
        port: u16,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let url = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ConnectError::Timeout {
                url: url.clone(),
                timeout,
            })?
            .map_err(|err| ConnectError::Unreachable {
                url: url.clone(),
                reason: err.to_string(),
            })?;
        stream.set_nodelay(true)?;
        tracing::info!("connected to {url}");

        let context = rtu::attach_slave(stream, Slave(1));
        Ok(Self::new(context, timeout, Some(rtu_frame_delay(baud_rate))))
    }

    /// RTU framing over UDP
    pub async fn connect_rtu_over_udp(
        host: &str,
        port: u16,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let socket = connect_datagrams(host, port, false, timeout).await?;
        let context = rtu::attach_slave(socket, Slave(1));
        Ok(Self::new(context, timeout, Some(rtu_frame_delay(baud_rate))))
    }

    fn new(context: modbus::Context, timeout: Duration, frame_delay: Option<Duration>) -> Self {
        Self {
            context,
            timing: Timing {
                timeout,
                frame_delay,
            },
        }
    }
}

async fn connect_datagrams(
    host: &str,
    port: u16,
    mbap: bool,
    timeout: Duration,
) -> Result<Datagrams, ConnectError> {
    let url = format!("{host}:{port}");
    let socket = tokio::time::timeout(timeout, bind_udp(host, port))
        .await
        .map_err(|_| ConnectError::Timeout {
            url: url.clone(),
            timeout,
        })?
        .map_err(|err| ConnectError::Unreachable {
            url: url.clone(),
            reason: err.to_string(),
        })?;
    tracing::info!("sending datagrams to {url}");
    Ok(Datagrams {
        socket,
        mbap,
        sent: None,
    })
}

async fn bind_udp(host: &str, port: u16) -> io::Result<UdpSocket> {
    let remote = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address"))?;
    let local: SocketAddr = if remote.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;
    Ok(socket)
}

/// Run one request after the inter-frame gap, bounded by the response timeout
async fn exchange<T, F>(timing: Timing, request: F) -> Result<T, TransportError>
where
    F: Future<Output = tokio_modbus::Result<T>>,
{
    if let Some(delay) = timing.frame_delay {
        tokio::time::sleep(delay).await;
    }
    match tokio::time::timeout(timing.timeout, request).await {
        Err(_) => Err(TransportError::Timeout),
        Ok(Err(err)) => Err(err.into()),
        Ok(Ok(Err(exception))) => Err(TransportError::Exception {
            code: u8::from(exception),
        }),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

impl Session for SocketSession {
    fn set_unit_id(&mut self, unit_id: UnitId) {
        self.context.set_slave(Slave(unit_id.value));
    }

    async fn read_coils(&mut self, range: AddressRange) -> Result<Vec<bool>, TransportError> {
        let request = self.context.read_coils(range.start, range.count);
        exchange(self.timing, request).await
    }

    async fn read_discrete_inputs(
        &mut self,
        range: AddressRange,
    ) -> Result<Vec<bool>, TransportError> {
        let request = self.context.read_discrete_inputs(range.start, range.count);
        exchange(self.timing, request).await
    }

    async fn read_registers(
        &mut self,
        space: RegisterSpace,
        range: AddressRange,
    ) -> Result<Vec<u16>, TransportError> {
        match space {
            RegisterSpace::Input => {
                let request = self.context.read_input_registers(range.start, range.count);
                exchange(self.timing, request).await
            }
            RegisterSpace::Holding => {
                let request = self.context.read_holding_registers(range.start, range.count);
                exchange(self.timing, request).await
            }
        }
    }

    async fn write_coils(&mut self, start: u16, values: Vec<bool>) -> Result<(), TransportError> {
        let request = self.context.write_multiple_coils(start, &values);
        exchange(self.timing, request).await
    }

    async fn write_registers(
        &mut self,
        start: u16,
        values: Vec<u16>,
    ) -> Result<(), TransportError> {
        let request = self.context.write_multiple_registers(start, &values);
        exchange(self.timing, request).await
    }

    async fn close(&mut self) {
        if let Err(err) = Client::disconnect(&mut self.context).await {
            tracing::debug!("error closing the connection: {err}");
        }
    }
}
