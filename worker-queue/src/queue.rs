//! The polling loop driving a [`Worker`].

use crate::backoff::reconnect_delay;
use crate::{QueueError, QueueResult, Wake, WakeSource, Worker};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Loop configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Component whose commands are processed.
    pub component: String,
    /// Longest wait between polls when no notification arrives.
    pub poll_timeout: Duration,
    /// Reconnect attempts before a transient failure becomes fatal.
    pub connection_retries: u32,
    /// First reconnect delay; doubled on every further attempt.
    pub connection_retry_delay: Duration,
}

impl QueueConfig {
    /// Configuration with defaults for `component`.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            poll_timeout: Duration::from_secs(300),
            connection_retries: 5,
            connection_retry_delay: Duration::from_millis(500),
        }
    }

    /// Set the polling timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub const fn with_connection_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.connection_retries = retries;
        self.connection_retry_delay = delay;
        self
    }
}

/// Tracks consecutive transient failures of one operation.
struct Reconnect {
    attempts: u32,
    max: u32,
    base: Duration,
}

impl Reconnect {
    const fn new(config: &QueueConfig) -> Self {
        Self {
            attempts: 0,
            max: config.connection_retries,
            base: config.connection_retry_delay,
        }
    }

    /// Delay before retrying, or the error to propagate.
    fn on_error(&mut self, err: QueueError) -> QueueResult<Duration> {
        if !err.is_transient() {
            return Err(err);
        }
        if self.attempts >= self.max {
            return Err(QueueError::RetriesExhausted {
                attempts: self.attempts,
                source: Box::new(err),
            });
        }
        let delay = reconnect_delay(self.base, self.attempts);
        self.attempts += 1;
        warn!(
            error = %err,
            attempt = self.attempts,
            max = self.max,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Transient queue failure, retrying"
        );
        Ok(delay)
    }
}

/// Repeatedly drains a worker and waits for notifications or the poll timeout.
///
/// The loop is single-threaded: one `work()` call at a time. Cancelling the
/// shutdown token ends the loop once the current `work()` call returns.
#[derive(Debug)]
pub struct CommandQueue<W, N> {
    worker: W,
    wake: N,
    config: QueueConfig,
    shutdown: CancellationToken,
}

impl<W, N> CommandQueue<W, N>
where
    W: Worker,
    N: WakeSource,
{
    /// Create a queue loop.
    #[must_use]
    pub const fn new(worker: W, wake: N, config: QueueConfig, shutdown: CancellationToken) -> Self {
        Self {
            worker,
            wake,
            config,
            shutdown,
        }
    }

    /// The worker driven by this queue.
    #[must_use]
    pub const fn worker(&self) -> &W {
        &self.worker
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns error if reconnecting fails repeatedly or the worker reports a
    /// non-transient failure.
    pub async fn run(&mut self) -> QueueResult<()> {
        info!(component = %self.config.component, "Command queue started");
        let shutdown = self.shutdown.clone();

        while !shutdown.is_cancelled() {
            self.run_once().await?;
            if shutdown.is_cancelled() {
                break;
            }

            let wake = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                wake = self.wait() => wake?,
            };
            match wake {
                Wake::Notified => debug!("Woken by notification"),
                Wake::TimedOut => debug!("Poll timeout elapsed"),
            }
        }

        info!(component = %self.config.component, "Command queue stopped");
        Ok(())
    }

    /// Invoke the worker until nothing is claimable; returns the number of
    /// processed units.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn run_once(&mut self) -> QueueResult<usize> {
        let mut processed = 0;
        while !self.shutdown.is_cancelled() && self.work().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn work(&mut self) -> QueueResult<bool> {
        let mut reconnect = Reconnect::new(&self.config);
        loop {
            match self.worker.work().await {
                Ok(more) => return Ok(more),
                Err(err) => tokio::time::sleep(reconnect.on_error(err)?).await,
            }
        }
    }

    async fn wait(&mut self) -> QueueResult<Wake> {
        let mut reconnect = Reconnect::new(&self.config);
        loop {
            match self.wake.wait(self.config.poll_timeout).await {
                Ok(wake) => return Ok(wake),
                Err(err) => tokio::time::sleep(reconnect.on_error(err)?).await,
            }
        }
    }
}
