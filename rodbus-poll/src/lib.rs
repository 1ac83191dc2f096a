//! A command line Modbus polling client in the spirit of `mbpoll`, built on [rodbus](https://crates.io/crates/rodbus).
//!
//! A run reads or writes one contiguous block of coils, discrete inputs, input registers or
//! holding registers on a single server:
//!
//! 1. [`cli::parse`] turns the command line into a validated [`Config`]
//! 2. [`Operation::resolve`] picks the single operation of the run and narrows write values
//! 3. [`TransportConfig::select`] maps the mode and target to an [`Endpoint`], then opens a
//!    [`Session`] to it
//! 4. the [`poll`] loop drives a [`Dispatcher`], which renders results with the 32-bit
//!    codec of [`codec`]
//!
//! Every failure is reported as one [`Error`]; nothing is retried.
//!
//! ```no_run
//! # async fn example() -> Result<(), rodbus_poll::Error> {
//! let config = rodbus_poll::cli::parse(["-t", "4:float", "-c", "2", "-1", "192.168.1.100"])?;
//! rodbus_poll::run(&config, std::io::stdout()).await
//! # }
//! ```

use std::io::Write;

use rodbus::UnitId;

pub use crate::codec::WordOrder;
pub use crate::config::{Config, DataType, Mode, RegisterFormat, Target};
pub use crate::dispatch::{Addressing, Dispatcher, Operation};
pub use crate::error::{ConfigError, ConnectError, Error, OperationError, TransportError};
pub use crate::mock::{MockRequest, MockSession};
pub use crate::poll::Schedule;
pub use crate::session::{BoundSession, RegisterSpace, Session};
pub use crate::transport::{AnySession, Endpoint, TransportConfig};

/// Command line parsing and validation
pub mod cli;
pub mod codec;
/// Validated configuration of a run
pub mod config;
/// Execution and rendering of read and write operations
pub mod dispatch;
/// Error types
pub mod error;
pub mod mock;
/// Repetition of reads
pub mod poll;
/// Session abstraction over the transports
pub mod session;
pub mod transport;

/// Perform the run described by a configuration, writing results to `out`
///
/// The operation is resolved and the transport selected before anything is opened. Once a
/// session is open it is closed again whatever the outcome.
pub async fn run<W: Write>(config: &Config, mut out: W) -> Result<(), Error> {
    let operation = Operation::resolve(config)?;
    let transport = TransportConfig::select(config)?;

    if config.verbose {
        out.write_all(config.summary().as_bytes())
            .map_err(OperationError::from)?;
    }

    let session = transport.open().await?;
    let (_, result) = run_session(config, &operation, session, out).await;
    result.map_err(Error::from)
}

/// Drive an already open session according to the configuration, then close it
///
/// The closed session is handed back along with the outcome.
pub async fn run_session<S, W>(
    config: &Config,
    operation: &Operation,
    session: S,
    out: W,
) -> (S, Result<(), OperationError>)
where
    S: Session,
    W: Write,
{
    let bound = BoundSession::bind(session, UnitId::new(config.unit_id), config.word_order);
    let mut dispatcher = Dispatcher::new(bound, Addressing::from_config(config), out);

    let result = poll::run(&mut dispatcher, operation, Schedule::from_config(config)).await;
    if let Err(err) = &result {
        tracing::debug!("run ended: {err}");
    }

    let (bound, _) = dispatcher.into_parts();
    (bound.close().await, result)
}
