//! Database repositories and object storage used by the worker.

pub mod objects;
pub mod postgres;

use crate::model::{Document, FinishedDocument, StorageUsage, TemplateComposite, TenantConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use uuid::Uuid;

pub use objects::LocalObjectStorage;
pub use postgres::{PgDocumentRepository, PgTemplateSource};

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Object key escapes its bucket.
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Object key scoped to a tenant when the deployment is multi-tenant.
#[must_use]
pub fn object_key(multi_tenant: bool, tenant_uuid: Uuid, key: &str) -> String {
    if multi_tenant {
        format!("{tenant_uuid}/{key}")
    } else {
        key.to_string()
    }
}

/// Document records and tenant policies.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Load a document.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    async fn fetch_document(&self, tenant_uuid: Uuid, document_uuid: Uuid) -> StorageResult<Option<Document>>;

    /// Load the stored rendering context of a document.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    async fn fetch_document_context(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
    ) -> StorageResult<Option<serde_json::Value>>;

    /// Mark a document as in progress.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    async fn start_processing(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
        retrieved_at: DateTime<Utc>,
    ) -> StorageResult<()>;

    /// Record a generated document.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    async fn finish_document(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
        finished: &FinishedDocument,
    ) -> StorageResult<()>;

    /// Record a failed generation with its user-facing message.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    async fn fail_document(&self, tenant_uuid: Uuid, document_uuid: Uuid, worker_log: &str) -> StorageResult<()>;

    /// Document features of a tenant.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    async fn tenant_config(&self, tenant_uuid: Uuid) -> StorageResult<TenantConfig>;

    /// Storage consumed by a tenant.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    async fn storage_usage(&self, tenant_uuid: Uuid) -> StorageResult<StorageUsage>;
}

/// Authoritative source of template composites.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Load the current composite of a template.
    ///
    /// # Errors
    ///
    /// Returns error if the database query fails.
    async fn fetch_template(&self, tenant_uuid: Uuid, template_id: &str) -> StorageResult<Option<TemplateComposite>>;
}

/// Bucket/key object storage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store an object, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns error if the object cannot be written.
    async fn put_object(&self, bucket: &str, key: &str, content_type: &str, data: Vec<u8>) -> StorageResult<()>;

    /// Download an object into a local file; `false` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the object exists but cannot be copied.
    async fn get_object_to_file(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_prefixed_only_when_multi_tenant() {
        let tenant = Uuid::nil();
        assert_eq!(object_key(false, tenant, "documents/a"), "documents/a");
        assert_eq!(
            object_key(true, tenant, "documents/a"),
            "00000000-0000-0000-0000-000000000000/documents/a"
        );
    }
}
