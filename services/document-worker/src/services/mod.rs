//! Document generation services.

pub mod jobs;
pub mod naming;
pub mod registry;
pub mod watermark;

pub use jobs::{DocumentJobs, JobFailure, JobSettings};
pub use naming::FileNamer;
pub use registry::{PreparedTemplate, RegistryError, RegistrySettings, SyncReport, TemplateRegistry};
pub use watermark::watermark_pdf;
