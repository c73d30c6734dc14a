//! Records read from and written to the database.

pub mod document;
pub mod template;
pub mod tenant;

pub use document::{Document, DocumentState, FinishedDocument, GenerateDocumentBody};
pub use template::{FormatDescriptor, StepDescriptor, TemplateAsset, TemplateComposite, TemplateFile, TemplateRecord};
pub use tenant::{StorageUsage, TenantConfig};
