//! Documents requested by users and the command payload that triggers them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Generation state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentState {
    /// Waiting for a worker.
    #[serde(rename = "QueuedDocumentState")]
    Queued,
    /// A worker is processing it.
    #[serde(rename = "InProgressDocumentState")]
    InProgress,
    /// Generated and stored.
    #[serde(rename = "DoneDocumentState")]
    Done,
    /// Generation failed; see the worker log.
    #[serde(rename = "ErrorDocumentState")]
    Error,
}

impl DocumentState {
    /// Database representation of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QueuedDocumentState",
            Self::InProgress => "InProgressDocumentState",
            Self::Done => "DoneDocumentState",
            Self::Error => "ErrorDocumentState",
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QueuedDocumentState" => Ok(Self::Queued),
            "InProgressDocumentState" => Ok(Self::InProgress),
            "DoneDocumentState" => Ok(Self::Done),
            "ErrorDocumentState" => Ok(Self::Error),
            other => Err(format!("unknown document state '{other}'")),
        }
    }
}

impl TryFrom<String> for DocumentState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        value.parse()
    }
}

/// A row of the `document` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identity.
    pub uuid: Uuid,
    /// Title given by the user.
    pub name: String,
    /// Generation state.
    #[sqlx(try_from = "String")]
    pub state: DocumentState,
    /// Template rendering the document.
    pub document_template_id: String,
    /// Format of the template to produce.
    pub format_uuid: Uuid,
    /// Questionnaire the document is generated from.
    pub questionnaire_uuid: Option<Uuid>,
    /// Stored file name, set once finished.
    pub file_name: Option<String>,
    /// Stored content type, set once finished.
    pub content_type: Option<String>,
    /// Stored size in bytes, set once finished.
    pub file_size: Option<i64>,
    /// Message shown to the user about the last generation.
    pub worker_log: Option<String>,
    /// When a worker picked the document up.
    pub retrieved_at: Option<DateTime<Utc>>,
    /// When generation finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Owning tenant.
    pub tenant_uuid: Uuid,
}

/// Outcome of a successful generation recorded on the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedDocument {
    /// Stored file name.
    pub file_name: String,
    /// MIME type of the stored file.
    pub content_type: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Message shown to the user.
    pub worker_log: String,
    /// Completion timestamp.
    pub finished_at: DateTime<Utc>,
}

/// Body of a `generateDocument` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateDocumentBody {
    /// Tenant owning the document.
    pub tenant_uuid: Uuid,
    /// Document to generate.
    pub document_uuid: Uuid,
    /// Context sent along with the command instead of being stored.
    #[serde(default)]
    pub document_context: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_state_round_trips_database_names() {
        for state in [
            DocumentState::Queued,
            DocumentState::InProgress,
            DocumentState::Done,
            DocumentState::Error,
        ] {
            assert_eq!(state.as_str().parse::<DocumentState>().unwrap(), state);
        }
        assert!("Finished".parse::<DocumentState>().is_err());
    }

    #[test]
    fn test_command_body_context_is_optional() {
        let tenant = Uuid::new_v4();
        let document = Uuid::new_v4();
        let body: GenerateDocumentBody = serde_json::from_value(json!({
            "tenantUuid": tenant,
            "documentUuid": document,
        }))
        .unwrap();

        assert_eq!(body.tenant_uuid, tenant);
        assert_eq!(body.document_uuid, document);
        assert!(body.document_context.is_none());
    }
}
