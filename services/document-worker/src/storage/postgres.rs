//! PostgreSQL repositories.

use super::{DocumentRepository, StorageResult, TemplateSource};
use crate::model::{
    Document, DocumentState, FinishedDocument, StorageUsage, TemplateAsset, TemplateComposite, TemplateFile,
    TemplateRecord, TenantConfig,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const FETCH_DOCUMENT: &str = r"
SELECT uuid, name, state, document_template_id, format_uuid, questionnaire_uuid, file_name,
       content_type, file_size, worker_log, retrieved_at, finished_at, created_at, tenant_uuid
FROM document
WHERE uuid = $1 AND tenant_uuid = $2";

const FETCH_CONTEXT: &str = r"
SELECT context FROM document_context WHERE document_uuid = $1 AND tenant_uuid = $2";

const START_PROCESSING: &str = r"
UPDATE document SET state = $3, retrieved_at = $4, worker_log = NULL
WHERE uuid = $1 AND tenant_uuid = $2";

const FINISH_DOCUMENT: &str = r"
UPDATE document
SET state = $3, file_name = $4, content_type = $5, file_size = $6, worker_log = $7, finished_at = $8
WHERE uuid = $1 AND tenant_uuid = $2";

const FAIL_DOCUMENT: &str = r"
UPDATE document SET state = $3, worker_log = $4, finished_at = now()
WHERE uuid = $1 AND tenant_uuid = $2";

const TENANT_CONFIG: &str = r"
SELECT pdf_only, pdf_watermark FROM tenant_config WHERE uuid = $1";

const STORAGE_USAGE: &str = r#"
SELECT
    (SELECT COALESCE(SUM(file_size), 0)::bigint FROM document WHERE tenant_uuid = $1) AS used,
    (SELECT storage FROM tenant_limit_bundle WHERE uuid = $1) AS "limit""#;

const FETCH_TEMPLATE: &str = r"
SELECT id, name, formats, updated_at FROM document_template WHERE id = $1 AND tenant_uuid = $2";

const FETCH_TEMPLATE_FILES: &str = r"
SELECT uuid, file_name, content, updated_at
FROM document_template_file WHERE template_id = $1 AND tenant_uuid = $2";

const FETCH_TEMPLATE_ASSETS: &str = r"
SELECT uuid, file_name, content_type, file_size, updated_at
FROM document_template_asset WHERE template_id = $1 AND tenant_uuid = $2";

/// Document repository on the shared query pool.
#[derive(Debug, Clone)]
pub struct PgDocumentRepository {
    pool: PgPool,
}

impl PgDocumentRepository {
    /// Create a repository using the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn fetch_document(&self, tenant_uuid: Uuid, document_uuid: Uuid) -> StorageResult<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(FETCH_DOCUMENT)
            .bind(document_uuid)
            .bind(tenant_uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(document)
    }

    async fn fetch_document_context(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
    ) -> StorageResult<Option<serde_json::Value>> {
        let context = sqlx::query_scalar::<_, serde_json::Value>(FETCH_CONTEXT)
            .bind(document_uuid)
            .bind(tenant_uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(context)
    }

    async fn start_processing(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
        retrieved_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(START_PROCESSING)
            .bind(document_uuid)
            .bind(tenant_uuid)
            .bind(DocumentState::InProgress.as_str())
            .bind(retrieved_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_document(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
        finished: &FinishedDocument,
    ) -> StorageResult<()> {
        sqlx::query(FINISH_DOCUMENT)
            .bind(document_uuid)
            .bind(tenant_uuid)
            .bind(DocumentState::Done.as_str())
            .bind(&finished.file_name)
            .bind(&finished.content_type)
            .bind(finished.file_size)
            .bind(&finished.worker_log)
            .bind(finished.finished_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_document(&self, tenant_uuid: Uuid, document_uuid: Uuid, worker_log: &str) -> StorageResult<()> {
        sqlx::query(FAIL_DOCUMENT)
            .bind(document_uuid)
            .bind(tenant_uuid)
            .bind(DocumentState::Error.as_str())
            .bind(worker_log)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn tenant_config(&self, tenant_uuid: Uuid) -> StorageResult<TenantConfig> {
        let config = sqlx::query_as::<_, TenantConfig>(TENANT_CONFIG)
            .bind(tenant_uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(config.unwrap_or_default())
    }

    async fn storage_usage(&self, tenant_uuid: Uuid) -> StorageResult<StorageUsage> {
        let usage = sqlx::query_as::<_, StorageUsage>(STORAGE_USAGE)
            .bind(tenant_uuid)
            .fetch_one(&self.pool)
            .await?;
        Ok(usage)
    }
}

/// Template source on the shared query pool.
#[derive(Debug, Clone)]
pub struct PgTemplateSource {
    pool: PgPool,
}

impl PgTemplateSource {
    /// Create a source using the given pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateSource for PgTemplateSource {
    async fn fetch_template(&self, tenant_uuid: Uuid, template_id: &str) -> StorageResult<Option<TemplateComposite>> {
        let Some(template) = sqlx::query_as::<_, TemplateRecord>(FETCH_TEMPLATE)
            .bind(template_id)
            .bind(tenant_uuid)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let files = sqlx::query_as::<_, TemplateFile>(FETCH_TEMPLATE_FILES)
            .bind(template_id)
            .bind(tenant_uuid)
            .fetch_all(&self.pool)
            .await?;
        let assets = sqlx::query_as::<_, TemplateAsset>(FETCH_TEMPLATE_ASSETS)
            .bind(template_id)
            .bind(tenant_uuid)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(TemplateComposite::new(template, files, assets)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_updates_are_tenant_scoped() {
        for query in [START_PROCESSING, FINISH_DOCUMENT, FAIL_DOCUMENT, FETCH_DOCUMENT] {
            assert!(query.contains("tenant_uuid = $2"), "{query}");
        }
    }

    #[test]
    fn test_template_queries_are_tenant_scoped() {
        for query in [FETCH_TEMPLATE, FETCH_TEMPLATE_FILES, FETCH_TEMPLATE_ASSETS] {
            assert!(query.contains("tenant_uuid = $2"), "{query}");
        }
    }
}
