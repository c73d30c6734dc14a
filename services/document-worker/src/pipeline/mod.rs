//! Format pipeline: typed files flowing through a chain of steps.

pub mod error;
pub mod file;
pub mod format;
pub mod steps;

use crate::context::DocumentContext;
use crate::templating::Templating;
use std::path::PathBuf;
use std::sync::Arc;

pub use error::{FormatError, PipelineError};
pub use file::{DocumentFile, FileFormat};
pub use format::Format;
pub use steps::Step;

/// Everything a step may read while producing a document.
#[derive(Debug, Clone)]
pub struct RenderContext {
    /// Context as received, exposed as `ctx` and used by the json step.
    pub raw: Arc<serde_json::Value>,
    /// Resolved entity graph, exposed as `doc`.
    pub document: Arc<DocumentContext>,
    /// Local directory of the template; working directory of converters.
    pub template_dir: PathBuf,
    /// Shared template environment settings.
    pub templating: Arc<Templating>,
}
