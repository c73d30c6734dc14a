//! Claim-and-lock access to persistent commands.

use crate::{Backoff, PersistentCommand, QueueResult};
use async_trait::async_trait;
use std::time::Duration;

/// Source of claimable commands.
///
/// Implementations must guarantee that a row claimed by one caller is skipped
/// by every other concurrent caller until the claim is completed or dropped.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Handle to a claimed, locked command.
    type Claim: CommandClaim;

    /// Claim the next eligible command of `component`, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be queried.
    async fn claim(&self, component: &str, backoff: Backoff) -> QueueResult<Option<Self::Claim>>;
}

/// A command locked for the current worker.
///
/// Dropping a claim without completing it releases the lock and leaves the
/// row untouched.
#[async_trait]
pub trait CommandClaim: Send + Sized {
    /// The claimed command as read at claim time.
    fn command(&self) -> &PersistentCommand;

    /// Record success: `attempts + 1`, state `Done`.
    ///
    /// # Errors
    ///
    /// Returns error if the outcome cannot be persisted.
    async fn mark_done(self) -> QueueResult<()>;

    /// Record failure: `attempts + 1`, state `Error`, `last_error_message`.
    ///
    /// # Errors
    ///
    /// Returns error if the outcome cannot be persisted.
    async fn mark_error(self, message: &str) -> QueueResult<()>;
}

/// Why a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A change notification arrived.
    Notified,
    /// The polling timeout elapsed.
    TimedOut,
}

/// Notification channel multiplexed with the polling timer.
#[async_trait]
pub trait WakeSource: Send {
    /// Wait until a notification arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns error if the notification connection fails.
    async fn wait(&mut self, timeout: Duration) -> QueueResult<Wake>;
}
