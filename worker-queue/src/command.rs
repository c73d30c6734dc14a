//! The claimable unit of work stored in `persistent_command`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a persistent command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandState {
    /// Created by a producer and not yet processed successfully.
    New,
    /// Processed successfully.
    Done,
    /// Last processing attempt failed; eligible again after backoff.
    Error,
    /// Explicitly excluded from processing.
    Ignore,
}

impl CommandState {
    /// Database representation of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Done => "Done",
            Self::Error => "Error",
            Self::Ignore => "Ignore",
        }
    }

    /// Whether a command in this state may still be claimed.
    #[must_use]
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::New | Self::Error)
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "New" => Ok(Self::New),
            "Done" => Ok(Self::Done),
            "Error" => Ok(Self::Error),
            "Ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown command state '{other}'")),
        }
    }
}

impl TryFrom<String> for CommandState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        value.parse()
    }
}

/// A row of the `persistent_command` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PersistentCommand {
    /// Command identity.
    pub uuid: Uuid,
    /// Current state.
    #[sqlx(try_from = "String")]
    pub state: CommandState,
    /// Worker family owning the command.
    pub component: String,
    /// Function name within the component.
    pub function: String,
    /// Opaque JSON payload.
    pub body: serde_json::Value,
    /// Message recorded by the last failed attempt.
    pub last_error_message: Option<String>,
    /// Number of attempts made so far.
    pub attempts: i32,
    /// Upper bound for `attempts`.
    pub max_attempts: i32,
    /// Producer of the command, if recorded.
    pub created_by: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last state change.
    pub updated_at: DateTime<Utc>,
    /// Owning tenant.
    pub tenant_uuid: Uuid,
}

impl PersistentCommand {
    /// Create a fresh command as a producer would insert it.
    #[must_use]
    pub fn new(
        tenant_uuid: Uuid,
        component: impl Into<String>,
        function: impl Into<String>,
        body: serde_json::Value,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            state: CommandState::New,
            component: component.into(),
            function: function.into(),
            body,
            last_error_message: None,
            attempts: 0,
            max_attempts,
            created_by: None,
            created_at: now,
            updated_at: now,
            tenant_uuid,
        }
    }

    /// Whether the command may be claimed at `now` under the given backoff.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>, backoff: &crate::Backoff) -> bool {
        self.state.is_claimable()
            && self.attempts < self.max_attempts
            && now - self.updated_at >= backoff.delay(self.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Backoff;
    use chrono::Duration;

    fn command() -> PersistentCommand {
        PersistentCommand::new(Uuid::new_v4(), "doc_worker", "generateDocument", serde_json::json!({}), 3)
    }

    #[test]
    fn test_state_round_trip_through_text() {
        for state in [CommandState::New, CommandState::Done, CommandState::Error, CommandState::Ignore] {
            assert_eq!(state.as_str().parse::<CommandState>().unwrap(), state);
        }
        assert!("Pending".parse::<CommandState>().is_err());
    }

    #[test]
    fn test_new_command_is_eligible_immediately() {
        let backoff = Backoff::from_secs(60);
        assert!(command().is_eligible(Utc::now(), &backoff));
    }

    #[test]
    fn test_done_and_ignored_commands_are_not_eligible() {
        let backoff = Backoff::from_secs(60);
        let mut cmd = command();
        cmd.state = CommandState::Done;
        assert!(!cmd.is_eligible(Utc::now(), &backoff));
        cmd.state = CommandState::Ignore;
        assert!(!cmd.is_eligible(Utc::now(), &backoff));
    }

    #[test]
    fn test_exhausted_attempts_are_not_eligible() {
        let backoff = Backoff::from_secs(0);
        let mut cmd = command();
        cmd.attempts = cmd.max_attempts;
        assert!(!cmd.is_eligible(Utc::now(), &backoff));
    }

    #[test]
    fn test_failed_command_waits_for_backoff() {
        let backoff = Backoff::from_secs(60);
        let mut cmd = command();
        cmd.state = CommandState::Error;
        cmd.attempts = 2;
        let now = cmd.updated_at;
        // backoff(2) = 3 * 60s
        assert!(!cmd.is_eligible(now + Duration::seconds(179), &backoff));
        assert!(cmd.is_eligible(now + Duration::seconds(180), &backoff));
    }
}
