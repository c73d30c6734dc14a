//! Document worker.
//!
//! Claims `generateDocument` commands from the persistent command queue,
//! synchronizes the requested template into a local cache, runs the format
//! pipeline against the document context and stores the result.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod plugin;
pub mod services;
pub mod storage;
pub mod templating;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::DocumentWorkerConfig;
pub use error::{JobError, JobPhase, LimitError, WorkerError};
pub use plugin::{DocumentPlugin, PluginError};
pub use services::{DocumentJobs, JobSettings, TemplateRegistry};

use services::{FileNamer, RegistrySettings};
use std::sync::Arc;
use std::time::Duration;
use storage::{LocalObjectStorage, ObjectStorage, PgDocumentRepository, PgTemplateSource};
use templating::Templating;
use tokio_util::sync::CancellationToken;
use tracing::info;
use worker_queue::{ClaimingWorker, CommandQueue, PgCommandStore, PgWakeSource};

/// Run the worker until `shutdown` is cancelled or the queue gives up.
///
/// # Errors
///
/// Returns error if the database, object storage or template environment
/// cannot be initialized, or if the queue loop stops on a fatal error.
pub async fn run(
    config: &DocumentWorkerConfig,
    plugins: Vec<Arc<dyn DocumentPlugin>>,
    shutdown: CancellationToken,
) -> Result<(), WorkerError> {
    let database = &config.database;
    let budget = database.budget();
    let timeout = Duration::from_secs(database.connect_timeout_secs);
    let claims = worker_queue::connect(&database.url, budget.claims, timeout).await?;
    let queries = worker_queue::connect(&database.url, budget.queries, timeout).await?;

    let objects: Arc<dyn ObjectStorage> = Arc::new(LocalObjectStorage::new(config.storage.root.clone()).await?);
    let templating = Arc::new(Templating::new(&config.templating)?.with_plugins(plugins.clone()));
    let registry = Arc::new(TemplateRegistry::new(
        Arc::new(PgTemplateSource::new(queries.clone())),
        Arc::clone(&objects),
        config.externals.clone(),
        RegistrySettings::from_config(&config.templates, &config.storage),
    ));
    let jobs = DocumentJobs::new(
        Arc::new(PgDocumentRepository::new(queries)),
        objects,
        registry,
        templating,
        FileNamer::new(config.documents.naming)?,
        JobSettings::from_config(&config.documents, &config.storage),
    )
    .with_plugins(plugins);

    let queue_config = config.queue_config();
    let worker = ClaimingWorker::new(
        PgCommandStore::new(claims),
        jobs,
        queue_config.component.clone(),
        config.backoff(),
    );
    let wake = PgWakeSource::connect(&database.url, &queue_config.component).await?;

    info!(
        component = %queue_config.component,
        connections = budget.total(),
        "Document worker started"
    );
    CommandQueue::new(worker, wake, queue_config, shutdown).run().await?;
    info!("Document worker stopped");
    Ok(())
}
