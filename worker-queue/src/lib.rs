//! Persistent command queue for backend workers.
//!
//! Producers insert rows into the `persistent_command` table and emit a
//! notification on `persistent_command_channel__<component>`. A worker loop
//! claims one eligible row at a time with row-level locking, hands it to a
//! [`CommandHandler`], and records the outcome in the same transaction.
//!
//! Failed commands are retried with exponential backoff
//! `(2^attempts - 1) * base` until `max_attempts` is reached.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod command;
pub mod error;
pub mod postgres;
pub mod queue;
pub mod store;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backoff::{reconnect_delay, Backoff};
pub use command::{CommandState, PersistentCommand};
pub use error::{QueueError, QueueResult};
pub use postgres::{channel_name, connect, PgCommandClaim, PgCommandStore, PgWakeSource};
pub use queue::{CommandQueue, QueueConfig};
pub use store::{CommandClaim, CommandStore, Wake, WakeSource};
pub use worker::{ClaimingWorker, CommandError, CommandHandler, Worker};
