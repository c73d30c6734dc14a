//! Pipeline construction and execution errors.

use super::file::FileFormat;

/// A format descriptor that cannot be built into a pipeline.
///
/// Raised when the template is loaded, before anything is rendered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// No step of that name exists.
    #[error("unknown step '{0}'")]
    UnknownStep(String),
    /// The format has no steps.
    #[error("format '{0}' has no steps")]
    EmptyFormat(String),
    /// The step only transforms an existing file.
    #[error("step '{0}' cannot be the first step")]
    CannotBeFirst(String),
    /// The step only produces the initial file.
    #[error("step '{0}' can only be the first step")]
    CannotFollow(String),
    /// The previous step produces a file the step does not accept.
    #[error("step '{step}' cannot process {format} files")]
    Incompatible {
        /// Step name.
        step: String,
        /// Format produced by the previous step.
        format: FileFormat,
    },
    /// An option is required but missing.
    #[error("step '{step}' requires option '{option}'")]
    MissingOption {
        /// Step name.
        step: String,
        /// Option key.
        option: String,
    },
    /// An option has a value the step does not understand.
    #[error("step '{step}' has invalid option '{option}': {message}")]
    InvalidOption {
        /// Step name.
        step: String,
        /// Option key.
        option: String,
        /// What is wrong with it.
        message: String,
    },
}

impl FormatError {
    pub(crate) fn missing(step: &str, option: &str) -> Self {
        Self::MissingOption {
            step: step.to_string(),
            option: option.to_string(),
        }
    }

    pub(crate) fn invalid(step: &str, option: &str, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            step: step.to_string(),
            option: option.to_string(),
            message: message.into(),
        }
    }
}

/// A step failed while producing a document.
///
/// Never retried within the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The step failed.
    #[error("step '{step}' failed: {message}")]
    Step {
        /// Step name.
        step: &'static str,
        /// Human readable message.
        message: String,
    },
    /// The template reported a problem meant for the user.
    #[error("{message}")]
    UserFailure {
        /// Step name.
        step: &'static str,
        /// Message raised by the template.
        message: String,
    },
}

impl PipelineError {
    pub(crate) fn step(step: &'static str, message: impl Into<String>) -> Self {
        Self::Step {
            step,
            message: message.into(),
        }
    }

    /// Name of the failing step.
    #[must_use]
    pub const fn step_name(&self) -> &'static str {
        match self {
            Self::Step { step, .. } | Self::UserFailure { step, .. } => step,
        }
    }

    /// Whether the failure was raised on purpose by the template.
    #[must_use]
    pub const fn is_user_failure(&self) -> bool {
        matches!(self, Self::UserFailure { .. })
    }
}
