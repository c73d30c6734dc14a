//! Error taxonomy of the document worker.

use crate::pipeline::PipelineError;
use crate::plugin::PluginError;
use crate::services::registry::RegistryError;
use crate::storage::StorageError;
use crate::templating::TemplateError;
use std::fmt;
use uuid::Uuid;
use worker_queue::QueueError;

/// Phases of a document job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Load and claim the document.
    Fetch,
    /// Synchronize the template and pick the format.
    Prepare,
    /// Resolve the context and run the pipeline.
    Build,
    /// Upload the file.
    Store,
    /// Record the result.
    Finalize,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Prepare => "prepare",
            Self::Build => "build",
            Self::Store => "store",
            Self::Finalize => "finalize",
        })
    }
}

/// A document policy was violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The document is larger than allowed.
    #[error("document size {size} bytes exceeds the limit of {max} bytes")]
    Size {
        /// Generated size.
        size: u64,
        /// Largest allowed size.
        max: u64,
    },
    /// Storing the document would exceed the tenant quota.
    #[error("storage quota exceeded: required {required} bytes but only {remaining} bytes remain")]
    Quota {
        /// Size of the document.
        required: u64,
        /// Space left.
        remaining: u64,
    },
    /// Building and storing took longer than allowed.
    #[error("document generation exceeded the time limit of {seconds} seconds")]
    Timeout {
        /// The limit.
        seconds: u64,
    },
    /// The tenant may only generate PDF documents.
    #[error("only PDF documents are allowed, but format '{format}' produces {produces}")]
    PdfOnly {
        /// Requested format.
        format: String,
        /// What the format produces.
        produces: String,
    },
}

/// Failure of one document job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The command body cannot be read.
    #[error("invalid command body: {0}")]
    InvalidBody(String),
    /// No such document.
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),
    /// The document has already been generated.
    #[error("document {0} has already been generated")]
    AlreadyFinished(Uuid),
    /// Neither the command nor the database has a context.
    #[error("document context not found")]
    MissingContext,
    /// The context cannot be resolved.
    #[error("invalid document context: {0}")]
    InvalidContext(String),
    /// Template or format unavailable.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A step failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// A policy was violated.
    #[error(transparent)]
    Limit(#[from] LimitError),
    /// A plugin failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// The PDF cannot be watermarked.
    #[error("watermarking failed: {0}")]
    Watermark(String),
    /// Database or object storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl JobError {
    /// Raised on purpose by a template; expected and caused by the user.
    #[must_use]
    pub const fn is_user_failure(&self) -> bool {
        matches!(self, Self::Pipeline(err) if err.is_user_failure())
    }

    /// Message recorded on the document.
    #[must_use]
    pub fn worker_log(&self, phase: JobPhase) -> String {
        match self {
            Self::Pipeline(err) if err.is_user_failure() => err.to_string(),
            Self::Limit(err) => err.to_string(),
            other => format!("Document generation failed in {phase} phase: {other}"),
        }
    }
}

/// Errors that stop the worker process.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The queue gave up.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Storage could not be initialized.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Template environment could not be initialized.
    #[error(transparent)]
    Templating(#[from] TemplateError),
    /// Naming patterns could not be compiled.
    #[error("invalid naming pattern: {0}")]
    Naming(#[from] regex::Error),
}
