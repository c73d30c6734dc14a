//! Document generation jobs.
//!
//! A job runs `fetch -> prepare -> build -> store -> finalize`. Each phase
//! consumes the output of the previous one; the first error skips the rest
//! and is recorded on the document. Build and store share one soft deadline,
//! checked before the result is stored. A stored document is always
//! finalized, so a late upload never leaves an unreferenced object.

use super::naming::FileNamer;
use super::registry::{PreparedTemplate, TemplateRegistry};
use super::watermark::watermark_pdf;
use crate::config::{DocumentsConfig, StorageConfig};
use crate::context::DocumentContext;
use crate::error::{JobError, JobPhase, LimitError};
use crate::model::{Document, DocumentState, FinishedDocument, GenerateDocumentBody, TenantConfig};
use crate::pipeline::{DocumentFile, FileFormat, Format, RenderContext};
use crate::plugin::DocumentPlugin;
use crate::storage::{object_key, DocumentRepository, ObjectStorage};
use crate::templating::Templating;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, info_span, Instrument};
use worker_queue::{CommandError, CommandHandler, PersistentCommand};

/// A job error tagged with the phase that raised it.
#[derive(Debug)]
pub struct JobFailure {
    /// Failing phase.
    pub phase: JobPhase,
    /// What went wrong.
    pub error: JobError,
}

trait InPhase<T> {
    fn in_phase(self, phase: JobPhase) -> Result<T, JobFailure>;
}

impl<T, E: Into<JobError>> InPhase<T> for Result<T, E> {
    fn in_phase(self, phase: JobPhase) -> Result<T, JobFailure> {
        self.map_err(|err| JobFailure {
            phase,
            error: err.into(),
        })
    }
}

/// Document policies applied by every job.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Soft deadline of build and store.
    pub job_timeout: Option<Duration>,
    /// Largest allowed document.
    pub max_size: Option<u64>,
    /// Watermark text for tenants with watermarking enabled.
    pub watermark_text: String,
    /// Bucket documents are stored in.
    pub bucket: String,
    /// Object keys are prefixed with the tenant.
    pub multi_tenant: bool,
}

impl JobSettings {
    /// Settings from configuration.
    #[must_use]
    pub fn from_config(documents: &DocumentsConfig, storage: &StorageConfig) -> Self {
        Self {
            job_timeout: documents.job_timeout_secs.map(Duration::from_secs),
            max_size: documents.max_size,
            watermark_text: documents.pdf_watermark_text.clone(),
            bucket: storage.bucket.clone(),
            multi_tenant: storage.multi_tenant,
        }
    }
}

struct Fetched {
    document: Document,
    context: serde_json::Value,
    tenant: TenantConfig,
}

struct Prepared {
    fetched: Fetched,
    template: PreparedTemplate,
    format: Arc<Format>,
}

struct Built {
    document: Document,
    file: DocumentFile,
}

/// Generates documents for `generateDocument` commands.
pub struct DocumentJobs {
    documents: Arc<dyn DocumentRepository>,
    objects: Arc<dyn ObjectStorage>,
    registry: Arc<TemplateRegistry>,
    templating: Arc<Templating>,
    plugins: Vec<Arc<dyn DocumentPlugin>>,
    namer: FileNamer,
    settings: JobSettings,
}

impl std::fmt::Debug for DocumentJobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentJobs")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("plugins", &self.plugins.len())
            .finish_non_exhaustive()
    }
}

impl DocumentJobs {
    /// Create the job handler.
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        objects: Arc<dyn ObjectStorage>,
        registry: Arc<TemplateRegistry>,
        templating: Arc<Templating>,
        namer: FileNamer,
        settings: JobSettings,
    ) -> Self {
        Self {
            documents,
            objects,
            registry,
            templating,
            plugins: Vec::new(),
            namer,
            settings,
        }
    }

    /// Plugins called before each render.
    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<Arc<dyn DocumentPlugin>>) -> Self {
        self.plugins = plugins;
        self
    }

    /// The template cache.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Generate one document.
    ///
    /// # Errors
    ///
    /// Returns the first failing phase and its error; nothing is recorded on
    /// the document.
    pub async fn generate(&self, body: &GenerateDocumentBody) -> Result<FinishedDocument, JobFailure> {
        let started = Instant::now();
        let fetched = self.fetch(body).await?;
        let prepared = self.prepare(fetched).await?;

        let deadline = self.settings.job_timeout.map(|timeout| Instant::now() + timeout);
        let built = self.build(prepared).await?;
        self.check_deadline(deadline).in_phase(JobPhase::Build)?;
        let key = self.store(&built).await?;

        self.finalize(built, &key, started).await
    }

    async fn fetch(&self, body: &GenerateDocumentBody) -> Result<Fetched, JobFailure> {
        let phase = JobPhase::Fetch;
        let (tenant_uuid, document_uuid) = (body.tenant_uuid, body.document_uuid);
        let document = self
            .documents
            .fetch_document(tenant_uuid, document_uuid)
            .await
            .in_phase(phase)?
            .ok_or(JobError::DocumentNotFound(document_uuid))
            .in_phase(phase)?;
        if document.state == DocumentState::Done {
            return Err(JobError::AlreadyFinished(document_uuid)).in_phase(phase);
        }

        self.documents
            .start_processing(tenant_uuid, document_uuid, Utc::now())
            .await
            .in_phase(phase)?;

        let context = match &body.document_context {
            Some(context) => context.clone(),
            None => self
                .documents
                .fetch_document_context(tenant_uuid, document_uuid)
                .await
                .in_phase(phase)?
                .ok_or(JobError::MissingContext)
                .in_phase(phase)?,
        };
        let tenant = self.documents.tenant_config(tenant_uuid).await.in_phase(phase)?;
        Ok(Fetched {
            document,
            context,
            tenant,
        })
    }

    async fn prepare(&self, fetched: Fetched) -> Result<Prepared, JobFailure> {
        let phase = JobPhase::Prepare;
        let document = &fetched.document;
        let template = self
            .registry
            .prepare_template(document.tenant_uuid, &document.document_template_id)
            .await
            .in_phase(phase)?;
        let format = template.format(document.format_uuid).in_phase(phase)?;

        if fetched.tenant.pdf_only && format.output() != FileFormat::PDF {
            return Err(LimitError::PdfOnly {
                format: format.name().to_string(),
                produces: format.output().to_string(),
            })
            .in_phase(phase);
        }
        Ok(Prepared {
            fetched,
            template,
            format,
        })
    }

    async fn build(&self, prepared: Prepared) -> Result<Built, JobFailure> {
        let phase = JobPhase::Build;
        let Prepared {
            fetched,
            template,
            format,
        } = prepared;
        let Fetched {
            document,
            mut context,
            tenant,
        } = fetched;

        for plugin in &self.plugins {
            plugin.before_render(&document, &mut context).in_phase(phase)?;
        }
        let resolved = DocumentContext::from_json(&context)
            .map_err(|err| JobError::InvalidContext(err.to_string()))
            .in_phase(phase)?;
        let ctx = RenderContext {
            raw: Arc::new(context),
            document: Arc::new(resolved),
            template_dir: template.dir().to_path_buf(),
            templating: Arc::clone(&self.templating),
        };
        let mut file = format.execute(&ctx).await.in_phase(phase)?;
        drop(template);

        let size = u64::try_from(file.size()).unwrap_or(u64::MAX);
        if let Some(max) = self.settings.max_size {
            if size > max {
                return Err(LimitError::Size { size, max }).in_phase(phase);
            }
        }
        let usage = self.documents.storage_usage(document.tenant_uuid).await.in_phase(phase)?;
        if let Some(remaining) = usage.remaining() {
            let remaining = u64::try_from(remaining).unwrap_or_default();
            if size > remaining {
                return Err(LimitError::Quota {
                    required: size,
                    remaining,
                })
                .in_phase(phase);
            }
        }

        if tenant.pdf_watermark && file.format == FileFormat::PDF {
            let text = self.settings.watermark_text.clone();
            let content = std::mem::take(&mut file.content);
            file.content = tokio::task::spawn_blocking(move || watermark_pdf(&content, &text))
                .await
                .map_err(|err| JobError::Watermark(err.to_string()))
                .in_phase(phase)?
                .map_err(|err| JobError::Watermark(err.to_string()))
                .in_phase(phase)?;
        }
        Ok(Built { document, file })
    }

    async fn store(&self, built: &Built) -> Result<String, JobFailure> {
        let document = &built.document;
        let key = object_key(
            self.settings.multi_tenant,
            document.tenant_uuid,
            &format!("documents/{}", document.uuid),
        );
        self.objects
            .put_object(
                &self.settings.bucket,
                &key,
                built.file.format.content_type(),
                built.file.content.clone(),
            )
            .await
            .in_phase(JobPhase::Store)?;
        Ok(key)
    }

    async fn finalize(&self, built: Built, key: &str, started: Instant) -> Result<FinishedDocument, JobFailure> {
        let Built { document, file } = built;
        let finished = FinishedDocument {
            file_name: self
                .namer
                .file_name(document.uuid, &document.name, file.format.extension()),
            content_type: file.format.content_type().to_string(),
            file_size: i64::try_from(file.size()).unwrap_or(i64::MAX),
            worker_log: format!(
                "Document generated successfully in {:.2} s",
                started.elapsed().as_secs_f64()
            ),
            finished_at: Utc::now(),
        };
        self.documents
            .finish_document(document.tenant_uuid, document.uuid, &finished)
            .await
            .in_phase(JobPhase::Finalize)?;
        info!(
            key,
            file_name = %finished.file_name,
            file_size = finished.file_size,
            "Document stored"
        );
        Ok(finished)
    }

    fn check_deadline(&self, deadline: Option<Instant>) -> Result<(), LimitError> {
        match (deadline, self.settings.job_timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => Err(LimitError::Timeout {
                seconds: timeout.as_secs(),
            }),
            _ => Ok(()),
        }
    }

    async fn report(&self, body: &GenerateDocumentBody, failure: JobFailure) -> CommandError {
        let JobFailure { phase, error } = failure;
        let message = error.worker_log(phase);
        if error.is_user_failure() {
            info!(%phase, error = %error, "Document generation stopped by template");
        } else {
            error!(%phase, error = %error, "Document generation failed");
        }

        if matches!(error, JobError::DocumentNotFound(_) | JobError::AlreadyFinished(_)) {
            return CommandError::Failed(message);
        }
        match self
            .documents
            .fail_document(body.tenant_uuid, body.document_uuid, &message)
            .await
        {
            Ok(()) => CommandError::Failed(message),
            Err(err) => CommandError::Fatal(format!(
                "cannot record failure of document {}: {err}",
                body.document_uuid
            )),
        }
    }
}

#[async_trait]
impl CommandHandler for DocumentJobs {
    async fn handle(&self, command: &PersistentCommand) -> Result<(), CommandError> {
        let body: GenerateDocumentBody = serde_json::from_value(command.body.clone())
            .map_err(|err| CommandError::Failed(JobError::InvalidBody(err.to_string()).to_string()))?;
        let span = info_span!(
            "document_job",
            document_uuid = %body.document_uuid,
            tenant_uuid = %body.tenant_uuid,
        );
        async {
            match self.generate(&body).await {
                Ok(_) => Ok(()),
                Err(failure) => Err(self.report(&body, failure).await),
            }
        }
        .instrument(span)
        .await
    }

    async fn after_command(&self) {
        self.registry.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalsConfig, NamingStrategy, TemplatingConfig};
    use crate::model::{FormatDescriptor, StepDescriptor, StorageUsage, TemplateComposite, TemplateFile, TemplateRecord};
    use crate::services::registry::RegistrySettings;
    use crate::storage::{MockDocumentRepository, MockObjectStorage, MockTemplateSource, StorageError};
    use chrono::DateTime;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    const TENANT: Uuid = Uuid::from_u128(1);
    const DOC: Uuid = Uuid::from_u128(2);
    const JSON_FORMAT: Uuid = Uuid::from_u128(3);
    const HTML_FORMAT: Uuid = Uuid::from_u128(4);

    fn document(state: DocumentState) -> Document {
        Document {
            uuid: DOC,
            name: "Data Plan".into(),
            state,
            document_template_id: "org:plan:1.0.0".into(),
            format_uuid: JSON_FORMAT,
            questionnaire_uuid: None,
            file_name: None,
            content_type: None,
            file_size: None,
            worker_log: None,
            retrieved_at: None,
            finished_at: None,
            created_at: DateTime::UNIX_EPOCH,
            tenant_uuid: TENANT,
        }
    }

    fn composite() -> TemplateComposite {
        TemplateComposite::new(
            TemplateRecord {
                id: "org:plan:1.0.0".into(),
                name: "Plan".into(),
                formats: vec![
                    FormatDescriptor {
                        uuid: JSON_FORMAT,
                        name: "JSON".into(),
                        steps: vec![StepDescriptor::new("json")],
                    },
                    FormatDescriptor {
                        uuid: HTML_FORMAT,
                        name: "HTML".into(),
                        steps: vec![StepDescriptor::new("jinja").with_option("template", "index.html.j2")],
                    },
                ],
                updated_at: DateTime::UNIX_EPOCH,
            },
            [TemplateFile {
                uuid: Uuid::from_u128(10),
                file_name: "index.html.j2".into(),
                content: "{% if not ctx.title %}{{ fail('Title is required') }}{% endif %}<p>{{ ctx.title }}</p>".into(),
                updated_at: DateTime::UNIX_EPOCH,
            }],
            [],
        )
    }

    fn body() -> GenerateDocumentBody {
        GenerateDocumentBody {
            tenant_uuid: TENANT,
            document_uuid: DOC,
            document_context: Some(json!({"title": "Plan"})),
        }
    }

    fn command() -> PersistentCommand {
        PersistentCommand::new(TENANT, "doc_worker", "generateDocument", serde_json::to_value(body()).unwrap(), 3)
    }

    /// Repository that serves `document` and accepts updates.
    fn repository(document: Document, tenant: TenantConfig, usage: StorageUsage) -> MockDocumentRepository {
        let mut repo = MockDocumentRepository::new();
        repo.expect_fetch_document()
            .returning(move |_, _| Ok(Some(document.clone())));
        repo.expect_start_processing().returning(|_, _, _| Ok(()));
        repo.expect_tenant_config().returning(move |_| Ok(tenant));
        repo.expect_storage_usage().returning(move |_| Ok(usage));
        repo
    }

    fn jobs(dir: &TempDir, repo: MockDocumentRepository, objects: MockObjectStorage, settings: JobSettings) -> DocumentJobs {
        let mut source = MockTemplateSource::new();
        source.expect_fetch_template().returning(|_, _| Ok(Some(composite())));
        let registry = TemplateRegistry::new(
            Arc::new(source),
            Arc::new(MockObjectStorage::new()),
            ExternalsConfig::default(),
            RegistrySettings {
                dir: dir.path().to_path_buf(),
                retention: chrono::Duration::days(7),
                bucket: "engine-public".into(),
                multi_tenant: false,
            },
        );
        DocumentJobs::new(
            Arc::new(repo),
            Arc::new(objects),
            Arc::new(registry),
            Arc::new(Templating::new(&TemplatingConfig::default()).unwrap()),
            FileNamer::new(NamingStrategy::Slugify).unwrap(),
            settings,
        )
    }

    fn settings() -> JobSettings {
        JobSettings {
            job_timeout: None,
            max_size: None,
            watermark_text: "DEMO".into(),
            bucket: "engine-public".into(),
            multi_tenant: true,
        }
    }

    fn storing_objects() -> MockObjectStorage {
        let mut objects = MockObjectStorage::new();
        objects.expect_put_object().returning(|_, _, _, _| Ok(()));
        objects
    }

    #[tokio::test]
    async fn test_generates_and_finishes_document() {
        let dir = TempDir::new().unwrap();
        let mut repo = repository(document(DocumentState::Queued), TenantConfig::default(), StorageUsage::default());
        repo.expect_finish_document()
            .withf(|tenant, doc, finished| {
                *tenant == TENANT
                    && *doc == DOC
                    && finished.file_name == "data-plan.json"
                    && finished.content_type == "application/json"
                    && finished.worker_log.starts_with("Document generated successfully")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        repo.expect_fail_document().never();

        let mut objects = MockObjectStorage::new();
        objects
            .expect_put_object()
            .withf(|bucket, key, content_type, data| {
                bucket == "engine-public"
                    && key == format!("{TENANT}/documents/{DOC}")
                    && content_type == "application/json"
                    && serde_json::from_slice::<serde_json::Value>(data).unwrap() == json!({"title": "Plan"})
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let jobs = jobs(&dir, repo, objects, settings());
        jobs.handle(&command()).await.unwrap();
    }

    #[tokio::test]
    async fn test_context_is_loaded_when_not_inline() {
        let dir = TempDir::new().unwrap();
        let mut repo = repository(document(DocumentState::Queued), TenantConfig::default(), StorageUsage::default());
        repo.expect_fetch_document_context()
            .times(1)
            .returning(|_, _| Ok(Some(json!({"stored": true}))));
        repo.expect_finish_document().returning(|_, _, _| Ok(()));

        let jobs = jobs(&dir, repo, storing_objects(), settings());
        let mut body = body();
        body.document_context = None;
        let finished = jobs.generate(&body).await.unwrap();
        assert_eq!(finished.file_size, i64::try_from(b"{\n  \"stored\": true\n}".len()).unwrap());
    }

    #[tokio::test]
    async fn test_already_finished_document_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let mut repo = MockDocumentRepository::new();
        repo.expect_fetch_document()
            .returning(|_, _| Ok(Some(document(DocumentState::Done))));
        repo.expect_start_processing().never();
        repo.expect_fail_document().never();

        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings());
        let err = jobs.handle(&command()).await.unwrap_err();
        assert!(matches!(err, CommandError::Failed(ref m) if m.contains("already been generated")));
    }

    #[tokio::test]
    async fn test_pdf_only_tenant_rejects_other_formats() {
        let dir = TempDir::new().unwrap();
        let tenant = TenantConfig {
            pdf_only: true,
            pdf_watermark: false,
        };
        let mut repo = repository(document(DocumentState::Queued), tenant, StorageUsage::default());
        repo.expect_fail_document()
            .withf(|_, _, log| log.starts_with("only PDF documents are allowed"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings());
        let err = jobs.generate(&body()).await.unwrap_err();
        assert_eq!(err.phase, JobPhase::Prepare);
        jobs.handle(&command()).await.unwrap_err();
    }

    #[tokio::test]
    async fn test_quota_is_enforced_after_build() {
        let dir = TempDir::new().unwrap();
        let usage = StorageUsage {
            used: 95,
            limit: Some(100),
        };
        let repo = repository(document(DocumentState::Queued), TenantConfig::default(), usage);
        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings());

        let err = jobs.generate(&body()).await.unwrap_err();
        assert_eq!(err.phase, JobPhase::Build);
        assert!(err
            .error
            .to_string()
            .contains("but only 5 bytes remain"));
    }

    #[tokio::test]
    async fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let repo = repository(document(DocumentState::Queued), TenantConfig::default(), StorageUsage::default());
        let mut settings = settings();
        settings.max_size = Some(4);
        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings);

        let err = jobs.generate(&body()).await.unwrap_err();
        assert!(matches!(err.error, JobError::Limit(LimitError::Size { max: 4, .. })));
    }

    #[tokio::test]
    async fn test_exceeded_deadline_is_a_limit_violation() {
        let dir = TempDir::new().unwrap();
        let repo = repository(document(DocumentState::Queued), TenantConfig::default(), StorageUsage::default());
        let mut settings = settings();
        settings.job_timeout = Some(Duration::ZERO);
        let mut objects = MockObjectStorage::new();
        objects.expect_put_object().never();
        let jobs = jobs(&dir, repo, objects, settings);

        let err = jobs.generate(&body()).await.unwrap_err();
        assert_eq!(err.phase, JobPhase::Build);
        assert!(matches!(err.error, JobError::Limit(LimitError::Timeout { seconds: 0 })));
    }

    #[tokio::test]
    async fn test_slow_store_past_deadline_still_finishes() {
        let dir = TempDir::new().unwrap();
        let mut repo = repository(document(DocumentState::Queued), TenantConfig::default(), StorageUsage::default());
        repo.expect_finish_document().times(1).returning(|_, _, _| Ok(()));
        repo.expect_fail_document().never();
        let mut objects = MockObjectStorage::new();
        objects.expect_put_object().times(1).returning(|_, _, _, _| {
            std::thread::sleep(Duration::from_millis(1200));
            Ok(())
        });
        let mut settings = settings();
        settings.job_timeout = Some(Duration::from_secs(1));
        let jobs = jobs(&dir, repo, objects, settings);

        let finished = jobs.generate(&body()).await.unwrap();
        assert_eq!(finished.file_name, "data-plan.json");
    }

    #[tokio::test]
    async fn test_template_failure_is_recorded_verbatim() {
        let dir = TempDir::new().unwrap();
        let mut doc = document(DocumentState::Queued);
        doc.format_uuid = HTML_FORMAT;
        let mut repo = repository(doc, TenantConfig::default(), StorageUsage::default());
        repo.expect_fail_document()
            .withf(|_, _, log| log == "Title is required")
            .times(1)
            .returning(|_, _, _| Ok(()));
        repo.expect_finish_document().never();
        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings());

        let mut command = command();
        command.body = json!({"tenantUuid": TENANT, "documentUuid": DOC, "documentContext": {}});
        let err = jobs.handle(&command).await.unwrap_err();
        assert!(matches!(err, CommandError::Failed(ref m) if m == "Title is required"));
    }

    #[tokio::test]
    async fn test_unrecordable_failure_is_fatal() {
        let dir = TempDir::new().unwrap();
        let tenant = TenantConfig {
            pdf_only: true,
            pdf_watermark: false,
        };
        let mut repo = repository(document(DocumentState::Queued), tenant, StorageUsage::default());
        repo.expect_fail_document()
            .returning(|_, _, _| Err(StorageError::Database(sqlx::Error::PoolClosed)));

        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings());
        let err = jobs.handle(&command()).await.unwrap_err();
        assert!(matches!(err, CommandError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_invalid_body_fails_without_touching_documents() {
        let dir = TempDir::new().unwrap();
        let mut repo = MockDocumentRepository::new();
        repo.expect_fetch_document().never();
        let jobs = jobs(&dir, repo, MockObjectStorage::new(), settings());

        let mut command = command();
        command.body = json!({"documentUuid": "not-a-uuid"});
        let err = jobs.handle(&command).await.unwrap_err();
        assert!(matches!(err, CommandError::Failed(ref m) if m.starts_with("invalid command body")));
    }
}
