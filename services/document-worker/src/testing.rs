//! In-memory repositories for exercising jobs without a database.

use crate::model::{Document, DocumentState, FinishedDocument, StorageUsage, TemplateComposite, TenantConfig};
use crate::storage::{DocumentRepository, StorageResult, TemplateSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<(Uuid, Uuid), Document>,
    contexts: HashMap<(Uuid, Uuid), serde_json::Value>,
    tenants: HashMap<Uuid, TenantConfig>,
    usage: HashMap<Uuid, StorageUsage>,
}

/// Document table kept in memory. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocuments {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryDocuments {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub fn insert(&self, document: Document) {
        self.tables
            .lock()
            .documents
            .insert((document.tenant_uuid, document.uuid), document);
    }

    /// Store the rendering context of a document.
    pub fn set_context(&self, tenant_uuid: Uuid, document_uuid: Uuid, context: serde_json::Value) {
        self.tables.lock().contexts.insert((tenant_uuid, document_uuid), context);
    }

    /// Set the document features of a tenant.
    pub fn set_tenant_config(&self, tenant_uuid: Uuid, config: TenantConfig) {
        self.tables.lock().tenants.insert(tenant_uuid, config);
    }

    /// Set the storage consumption of a tenant.
    pub fn set_storage_usage(&self, tenant_uuid: Uuid, usage: StorageUsage) {
        self.tables.lock().usage.insert(tenant_uuid, usage);
    }

    /// Current copy of a document.
    #[must_use]
    pub fn get(&self, tenant_uuid: Uuid, document_uuid: Uuid) -> Option<Document> {
        self.tables.lock().documents.get(&(tenant_uuid, document_uuid)).cloned()
    }

    fn update(&self, tenant_uuid: Uuid, document_uuid: Uuid, apply: impl FnOnce(&mut Document)) {
        if let Some(document) = self.tables.lock().documents.get_mut(&(tenant_uuid, document_uuid)) {
            apply(document);
        }
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocuments {
    async fn fetch_document(&self, tenant_uuid: Uuid, document_uuid: Uuid) -> StorageResult<Option<Document>> {
        Ok(self.get(tenant_uuid, document_uuid))
    }

    async fn fetch_document_context(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
    ) -> StorageResult<Option<serde_json::Value>> {
        Ok(self.tables.lock().contexts.get(&(tenant_uuid, document_uuid)).cloned())
    }

    async fn start_processing(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
        retrieved_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        self.update(tenant_uuid, document_uuid, |document| {
            document.state = DocumentState::InProgress;
            document.retrieved_at = Some(retrieved_at);
        });
        Ok(())
    }

    async fn finish_document(
        &self,
        tenant_uuid: Uuid,
        document_uuid: Uuid,
        finished: &FinishedDocument,
    ) -> StorageResult<()> {
        let file_size = finished.file_size;
        self.update(tenant_uuid, document_uuid, |document| {
            document.state = DocumentState::Done;
            document.file_name = Some(finished.file_name.clone());
            document.content_type = Some(finished.content_type.clone());
            document.file_size = Some(finished.file_size);
            document.worker_log = Some(finished.worker_log.clone());
            document.finished_at = Some(finished.finished_at);
        });
        self.tables.lock().usage.entry(tenant_uuid).or_default().used += file_size;
        Ok(())
    }

    async fn fail_document(&self, tenant_uuid: Uuid, document_uuid: Uuid, worker_log: &str) -> StorageResult<()> {
        self.update(tenant_uuid, document_uuid, |document| {
            document.state = DocumentState::Error;
            document.worker_log = Some(worker_log.to_string());
            document.finished_at = Some(Utc::now());
        });
        Ok(())
    }

    async fn tenant_config(&self, tenant_uuid: Uuid) -> StorageResult<TenantConfig> {
        Ok(self.tables.lock().tenants.get(&tenant_uuid).copied().unwrap_or_default())
    }

    async fn storage_usage(&self, tenant_uuid: Uuid) -> StorageResult<StorageUsage> {
        Ok(self.tables.lock().usage.get(&tenant_uuid).copied().unwrap_or_default())
    }
}

/// Template table kept in memory. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplates {
    templates: Arc<Mutex<HashMap<(Uuid, String), TemplateComposite>>>,
}

impl InMemoryTemplates {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template composite.
    pub fn insert(&self, tenant_uuid: Uuid, composite: TemplateComposite) {
        self.templates
            .lock()
            .insert((tenant_uuid, composite.template.id.clone()), composite);
    }

    /// Remove a template.
    pub fn remove(&self, tenant_uuid: Uuid, template_id: &str) {
        self.templates.lock().remove(&(tenant_uuid, template_id.to_string()));
    }
}

#[async_trait]
impl TemplateSource for InMemoryTemplates {
    async fn fetch_template(&self, tenant_uuid: Uuid, template_id: &str) -> StorageResult<Option<TemplateComposite>> {
        Ok(self
            .templates
            .lock()
            .get(&(tenant_uuid, template_id.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> Document {
        Document {
            uuid: Uuid::from_u128(2),
            name: "Plan".into(),
            state: DocumentState::Queued,
            document_template_id: "org:plan:1.0.0".into(),
            format_uuid: Uuid::from_u128(3),
            questionnaire_uuid: None,
            file_name: None,
            content_type: None,
            file_size: None,
            worker_log: None,
            retrieved_at: None,
            finished_at: None,
            created_at: DateTime::UNIX_EPOCH,
            tenant_uuid: Uuid::from_u128(1),
        }
    }

    #[tokio::test]
    async fn test_finishing_counts_towards_usage() {
        let repo = InMemoryDocuments::new();
        let doc = document();
        repo.insert(doc.clone());
        repo.finish_document(
            doc.tenant_uuid,
            doc.uuid,
            &FinishedDocument {
                file_name: "plan.pdf".into(),
                content_type: "application/pdf".into(),
                file_size: 42,
                worker_log: "ok".into(),
                finished_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.get(doc.tenant_uuid, doc.uuid).unwrap().state, DocumentState::Done);
        assert_eq!(repo.storage_usage(doc.tenant_uuid).await.unwrap().used, 42);
    }
}
