//! Extension points called by the job orchestrator.
//!
//! Plugins are constructed by the host and passed in explicitly; the worker
//! never discovers or loads them on its own.

use crate::model::Document;
use minijinja::Environment;

/// Plugin failure; reported on the document like any other job error.
#[derive(Debug, thiserror::Error)]
#[error("plugin '{plugin}' failed: {message}")]
pub struct PluginError {
    /// Plugin name.
    pub plugin: String,
    /// Human readable message.
    pub message: String,
}

impl PluginError {
    /// Create a plugin error.
    #[must_use]
    pub fn new(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Hooks into document generation. Every hook defaults to a no-op.
pub trait DocumentPlugin: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Adjust the raw rendering context before it is resolved and rendered.
    ///
    /// # Errors
    ///
    /// Returns error to fail the document.
    fn before_render(&self, _document: &Document, _context: &mut serde_json::Value) -> Result<(), PluginError> {
        Ok(())
    }

    /// Register extra filters, functions or globals for template steps.
    fn extend_environment(&self, _env: &mut Environment<'static>) {}
}
