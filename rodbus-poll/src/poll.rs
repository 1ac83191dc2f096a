use std::io::Write;
use std::time::Duration;

use crate::config::Config;
use crate::dispatch::{Dispatcher, Operation};
use crate::error::OperationError;
use crate::session::Session;

/// When reads are repeated
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// perform the operation a single time
    Once,
    /// repeat reads with a fixed delay until one fails
    Every(Duration),
}

impl Schedule {
    /// Schedule of a configuration
    pub fn from_config(config: &Config) -> Self {
        if config.poll_once {
            Schedule::Once
        } else {
            Schedule::Every(config.poll_rate)
        }
    }
}

/// Run an operation according to the schedule
///
/// Writes are always performed exactly once. Reads are repeated until one of them fails,
/// and that failure is returned.
pub async fn run<S, W>(
    dispatcher: &mut Dispatcher<S, W>,
    operation: &Operation,
    schedule: Schedule,
) -> Result<(), OperationError>
where
    S: Session,
    W: Write,
{
    let period = match schedule {
        Schedule::Every(period) if operation.is_read() => period,
        _ => return dispatcher.execute(operation).await,
    };

    let mut iteration: u64 = 0;
    loop {
        iteration += 1;
        tracing::debug!("poll iteration {iteration}");
        dispatcher.execute(operation).await?;
        tokio::time::sleep(period).await;
    }
}

#[cfg(test)]
mod tests {
    use rodbus::UnitId;

    use super::*;
    use crate::codec::WordOrder;
    use crate::dispatch::{Addressing, ReadOperation, RegisterValues, WriteOperation};
    use crate::mock::MockSession;
    use crate::session::BoundSession;

    fn dispatcher(session: MockSession) -> Dispatcher<MockSession, Vec<u8>> {
        let bound = BoundSession::bind(session, UnitId::new(1), WordOrder::BigEndian);
        let addressing = Addressing {
            display_start: 1,
            wire_start: 0,
            count: 1,
        };
        Dispatcher::new(bound, addressing, Vec::new())
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_a_read_fails() {
        let mut dispatcher = dispatcher(MockSession::new().fail_after(3));
        let operation = Operation::Read(ReadOperation::Coils);
        let started = tokio::time::Instant::now();

        let err = run(
            &mut dispatcher,
            &operation,
            Schedule::Every(Duration::from_millis(500)),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "failed to read coils: response timeout");
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        let (bound, out) = dispatcher.into_parts();
        assert_eq!(String::from_utf8(out).unwrap().matches("Coils (1-1):").count(), 3);
        assert_eq!(bound.close().await.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_once() {
        let mut dispatcher = dispatcher(MockSession::new());
        let operation = Operation::Read(ReadOperation::Coils);

        run(&mut dispatcher, &operation, Schedule::Once).await.unwrap();

        let (bound, _) = dispatcher.into_parts();
        assert_eq!(bound.close().await.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_never_repeated() {
        let mut dispatcher = dispatcher(MockSession::new());
        let operation = Operation::Write(WriteOperation::HoldingRegisters(RegisterValues::Words(
            vec![1],
        )));

        run(
            &mut dispatcher,
            &operation,
            Schedule::Every(Duration::from_millis(10)),
        )
        .await
        .unwrap();

        let (bound, _) = dispatcher.into_parts();
        assert_eq!(bound.close().await.requests().len(), 1);
    }
}
