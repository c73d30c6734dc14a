//! In-memory store and wake source for exercising workers without a database.

use crate::{
    Backoff, CommandClaim, CommandState, CommandStore, PersistentCommand, QueueResult, Wake,
    WakeSource,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Table {
    rows: Vec<PersistentCommand>,
    locked: HashSet<Uuid>,
}

/// Command table kept in memory, with row locks emulating `SKIP LOCKED`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCommandStore {
    table: Arc<Mutex<Table>>,
}

impl InMemoryCommandStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command as a producer would.
    pub fn insert(&self, command: PersistentCommand) {
        self.table.lock().rows.push(command);
    }

    /// Current copy of a row.
    #[must_use]
    pub fn get(&self, uuid: Uuid) -> Option<PersistentCommand> {
        self.table.lock().rows.iter().find(|row| row.uuid == uuid).cloned()
    }

    /// Current copy of all rows.
    #[must_use]
    pub fn rows(&self) -> Vec<PersistentCommand> {
        self.table.lock().rows.clone()
    }

    fn complete(&self, uuid: Uuid, state: CommandState, message: Option<&str>) {
        let mut table = self.table.lock();
        if let Some(row) = table.rows.iter_mut().find(|row| row.uuid == uuid) {
            row.attempts += 1;
            row.state = state;
            row.updated_at = Utc::now();
            if let Some(message) = message {
                row.last_error_message = Some(message.to_string());
            }
        }
    }

    fn release(&self, uuid: Uuid) {
        self.table.lock().locked.remove(&uuid);
    }
}

#[async_trait]
impl CommandStore for InMemoryCommandStore {
    type Claim = InMemoryClaim;

    async fn claim(&self, component: &str, backoff: Backoff) -> QueueResult<Option<Self::Claim>> {
        let now = Utc::now();
        let mut table = self.table.lock();
        let Table { rows, locked } = &mut *table;
        let next = rows
            .iter()
            .filter(|row| row.component == component)
            .filter(|row| !locked.contains(&row.uuid))
            .filter(|row| row.is_eligible(now, &backoff))
            .min_by(|a, b| {
                a.attempts
                    .cmp(&b.attempts)
                    .then_with(|| b.updated_at.cmp(&a.updated_at))
            })
            .cloned();

        Ok(next.map(|command| {
            locked.insert(command.uuid);
            InMemoryClaim {
                store: self.clone(),
                command,
            }
        }))
    }
}

/// Claimed row of an [`InMemoryCommandStore`]; the lock is released on drop.
#[derive(Debug)]
pub struct InMemoryClaim {
    store: InMemoryCommandStore,
    command: PersistentCommand,
}

impl Drop for InMemoryClaim {
    fn drop(&mut self) {
        self.store.release(self.command.uuid);
    }
}

#[async_trait]
impl CommandClaim for InMemoryClaim {
    fn command(&self) -> &PersistentCommand {
        &self.command
    }

    async fn mark_done(self) -> QueueResult<()> {
        self.store.complete(self.command.uuid, CommandState::Done, None);
        Ok(())
    }

    async fn mark_error(self, message: &str) -> QueueResult<()> {
        self.store
            .complete(self.command.uuid, CommandState::Error, Some(message));
        Ok(())
    }
}

/// Wake source driven by an in-process channel.
#[derive(Debug)]
pub struct ChannelWakeSource {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Sender side of a [`ChannelWakeSource`].
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<()>,
}

impl Notifier {
    /// Emit a change notification.
    pub fn notify(&self) {
        let _ = self.tx.send(());
    }
}

impl ChannelWakeSource {
    /// Create a wake source and its notifier.
    #[must_use]
    pub fn channel() -> (Self, Notifier) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, Notifier { tx })
    }
}

#[async_trait]
impl WakeSource for ChannelWakeSource {
    async fn wait(&mut self, timeout: Duration) -> QueueResult<Wake> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(())) => Ok(Wake::Notified),
            Ok(None) => {
                tokio::time::sleep(timeout).await;
                Ok(Wake::TimedOut)
            }
            Err(_) => Ok(Wake::TimedOut),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(component: &str) -> PersistentCommand {
        PersistentCommand::new(Uuid::new_v4(), component, "generateDocument", json!({}), 3)
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_share_a_row() {
        let store = InMemoryCommandStore::new();
        store.insert(command("doc_worker"));

        let backoff = Backoff::from_secs(0);
        let first = store.claim("doc_worker", backoff).await.unwrap();
        let second = store.claim("doc_worker", backoff).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_dropped_claim_releases_row() {
        let store = InMemoryCommandStore::new();
        let cmd = command("doc_worker");
        let uuid = cmd.uuid;
        store.insert(cmd);

        let backoff = Backoff::from_secs(0);
        drop(store.claim("doc_worker", backoff).await.unwrap());
        let again = store.claim("doc_worker", backoff).await.unwrap().unwrap();

        assert_eq!(again.command().uuid, uuid);
        assert_eq!(store.get(uuid).unwrap().attempts, 0);
    }

    #[tokio::test]
    async fn test_claim_filters_component() {
        let store = InMemoryCommandStore::new();
        store.insert(command("mailer"));
        assert!(store
            .claim("doc_worker", Backoff::from_secs(0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_claim_prefers_fewer_attempts() {
        let store = InMemoryCommandStore::new();
        let mut retried = command("doc_worker");
        retried.attempts = 1;
        retried.state = CommandState::Error;
        retried.updated_at = Utc::now() - chrono::Duration::hours(1);
        let fresh = command("doc_worker");
        let fresh_uuid = fresh.uuid;
        store.insert(retried);
        store.insert(fresh);

        let claim = store
            .claim("doc_worker", Backoff::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claim.command().uuid, fresh_uuid);
    }

    #[tokio::test]
    async fn test_mark_error_records_message() {
        let store = InMemoryCommandStore::new();
        let cmd = command("doc_worker");
        let uuid = cmd.uuid;
        store.insert(cmd);

        let claim = store
            .claim("doc_worker", Backoff::from_secs(0))
            .await
            .unwrap()
            .unwrap();
        claim.mark_error("template missing").await.unwrap();

        let row = store.get(uuid).unwrap();
        assert_eq!(row.state, CommandState::Error);
        assert_eq!(row.attempts, 1);
        assert_eq!(row.max_attempts, 3);
        assert_eq!(row.last_error_message.as_deref(), Some("template missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wake_source_times_out_without_notification() {
        let (mut wake, _notifier) = ChannelWakeSource::channel();
        let result = wake.wait(Duration::from_secs(30)).await.unwrap();
        assert_eq!(result, Wake::TimedOut);
    }

    #[tokio::test]
    async fn test_wake_source_reports_notification() {
        let (mut wake, notifier) = ChannelWakeSource::channel();
        notifier.notify();
        let result = wake.wait(Duration::from_secs(30)).await.unwrap();
        assert_eq!(result, Wake::Notified);
    }
}
