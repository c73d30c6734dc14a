//! PostgreSQL implementation of the queue protocol.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a transaction that stays open
//! until the outcome is recorded, so concurrent workers never process the
//! same row. Wake-ups come from `LISTEN persistent_command_channel__<component>`.

use crate::{Backoff, CommandClaim, CommandStore, PersistentCommand, QueueResult, Wake, WakeSource};
use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

const CLAIM_COMMAND: &str = r"
SELECT uuid, state, component, function, body, last_error_message, attempts,
       max_attempts, created_by, created_at, updated_at, tenant_uuid
FROM persistent_command
WHERE component = $1
  AND attempts < max_attempts
  AND state NOT IN ('Done', 'Ignore')
  AND updated_at <= now() - make_interval(secs => $2::bigint * (power(2, attempts) - 1))
ORDER BY attempts ASC, updated_at DESC
LIMIT 1
FOR UPDATE SKIP LOCKED";

const MARK_DONE: &str = r"
UPDATE persistent_command
SET attempts = attempts + 1, state = 'Done', updated_at = now()
WHERE uuid = $1";

const MARK_ERROR: &str = r"
UPDATE persistent_command
SET attempts = attempts + 1, state = 'Error', last_error_message = $2, updated_at = now()
WHERE uuid = $1";

/// Notification channel for a worker component.
#[must_use]
pub fn channel_name(component: &str) -> String {
    format!("persistent_command_channel__{component}")
}

/// Open a connection pool of `max_connections`.
///
/// # Errors
///
/// Returns error if the database is unreachable.
pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> QueueResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(connect_timeout)
        .connect(url)
        .await?;
    info!(max_connections, "Database pool connected");
    Ok(pool)
}

/// Command store backed by the `persistent_command` table.
#[derive(Debug, Clone)]
pub struct PgCommandStore {
    pool: PgPool,
}

impl PgCommandStore {
    /// Create a store using the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommandStore for PgCommandStore {
    type Claim = PgCommandClaim;

    async fn claim(&self, component: &str, backoff: Backoff) -> QueueResult<Option<Self::Claim>> {
        let mut tx = self.pool.begin().await?;
        let command = sqlx::query_as::<_, PersistentCommand>(CLAIM_COMMAND)
            .bind(component)
            .bind(backoff.base_secs())
            .fetch_optional(&mut *tx)
            .await?;

        match command {
            Some(command) => {
                debug!(command_uuid = %command.uuid, "Claimed command");
                Ok(Some(PgCommandClaim { tx, command }))
            }
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }
}

/// Row lock held by an open transaction.
pub struct PgCommandClaim {
    tx: Transaction<'static, Postgres>,
    command: PersistentCommand,
}

impl std::fmt::Debug for PgCommandClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCommandClaim")
            .field("command", &self.command.uuid)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CommandClaim for PgCommandClaim {
    fn command(&self) -> &PersistentCommand {
        &self.command
    }

    async fn mark_done(mut self) -> QueueResult<()> {
        sqlx::query(MARK_DONE)
            .bind(self.command.uuid)
            .execute(&mut *self.tx)
            .await?;
        self.tx.commit().await?;
        Ok(())
    }

    async fn mark_error(mut self, message: &str) -> QueueResult<()> {
        sqlx::query(MARK_ERROR)
            .bind(self.command.uuid)
            .bind(message)
            .execute(&mut *self.tx)
            .await?;
        self.tx.commit().await?;
        Ok(())
    }
}

/// `LISTEN`-based wake source on its own connection, outside any pool.
pub struct PgWakeSource {
    listener: PgListener,
}

impl std::fmt::Debug for PgWakeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgWakeSource").finish_non_exhaustive()
    }
}

impl PgWakeSource {
    /// Open a listen connection to `url` and subscribe to the channel of
    /// `component`.
    ///
    /// # Errors
    ///
    /// Returns error if the listen connection cannot be established.
    pub async fn connect(url: &str, component: &str) -> QueueResult<Self> {
        let mut listener = PgListener::connect(url).await?;
        let channel = channel_name(component);
        listener.listen(&channel).await?;
        info!(%channel, "Listening for command notifications");
        Ok(Self { listener })
    }
}

#[async_trait]
impl WakeSource for PgWakeSource {
    async fn wait(&mut self, timeout: Duration) -> QueueResult<Wake> {
        match tokio::time::timeout(timeout, self.listener.recv()).await {
            Ok(Ok(notification)) => {
                debug!(payload = %notification.payload(), "Notification received");
                Ok(Wake::Notified)
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Ok(Wake::TimedOut),
        }
    }
}
