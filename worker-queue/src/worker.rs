//! Worker capabilities invoked by the queue loop.

use crate::{Backoff, CommandClaim, CommandStore, PersistentCommand, QueueError, QueueResult};
use async_trait::async_trait;
use tracing::{error, info, info_span, warn, Instrument};

/// A unit of work the queue invokes repeatedly until it reports `false`.
#[async_trait]
pub trait Worker: Send {
    /// Process at most one unit of work.
    ///
    /// Returns `true` if something was processed and the queue should try
    /// again immediately, `false` if nothing is claimable right now.
    ///
    /// # Errors
    ///
    /// Transient errors are retried by the queue; anything else ends the loop.
    async fn work(&mut self) -> QueueResult<bool>;
}

/// Outcome of a failed command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command failed; the failure is recorded on the row.
    #[error("{0}")]
    Failed(String),
    /// The failure could not be recorded; the worker must stop.
    #[error("{0}")]
    Fatal(String),
}

/// Executes the payload of a claimed command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle one command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Failed`] for recorded failures and
    /// [`CommandError::Fatal`] when the worker cannot continue.
    async fn handle(&self, command: &PersistentCommand) -> Result<(), CommandError>;

    /// Hook run after each processed command, outside its claim.
    async fn after_command(&self) {}
}

/// [`Worker`] that claims one command from a store and hands it to a handler.
#[derive(Debug)]
pub struct ClaimingWorker<S, H> {
    store: S,
    handler: H,
    component: String,
    backoff: Backoff,
}

impl<S, H> ClaimingWorker<S, H>
where
    S: CommandStore,
    H: CommandHandler,
{
    /// Create a worker for commands of `component`.
    #[must_use]
    pub fn new(store: S, handler: H, component: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            store,
            handler,
            component: component.into(),
            backoff,
        }
    }

    /// The handler processing claimed commands.
    #[must_use]
    pub const fn handler(&self) -> &H {
        &self.handler
    }
}

#[async_trait]
impl<S, H> Worker for ClaimingWorker<S, H>
where
    S: CommandStore,
    H: CommandHandler,
{
    async fn work(&mut self) -> QueueResult<bool> {
        let Some(claim) = self.store.claim(&self.component, self.backoff).await? else {
            return Ok(false);
        };
        let command = claim.command().clone();
        let span = info_span!(
            "command",
            command_uuid = %command.uuid,
            tenant_uuid = %command.tenant_uuid,
            function = %command.function,
            attempt = command.attempts + 1,
        );

        let handler = &self.handler;
        async move {
            match handler.handle(&command).await {
                Ok(()) => {
                    claim.mark_done().await?;
                    info!("Command processed");
                }
                Err(CommandError::Failed(message)) => {
                    warn!(error = %message, "Command failed");
                    claim.mark_error(&message).await?;
                }
                Err(CommandError::Fatal(message)) => {
                    error!(error = %message, "Command failed fatally");
                    if let Err(err) = claim.mark_error(&message).await {
                        error!(error = %err, "Could not record fatal failure on command");
                    }
                    return Err(QueueError::Fatal(message));
                }
            }
            Ok::<(), QueueError>(())
        }
        .instrument(span)
        .await?;

        self.handler.after_command().await;
        Ok(true)
    }
}
