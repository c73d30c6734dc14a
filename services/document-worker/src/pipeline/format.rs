//! A validated chain of steps producing one kind of file.

use super::error::{FormatError, PipelineError};
use super::file::{DocumentFile, FileFormat};
use super::steps::Step;
use super::RenderContext;
use crate::config::ExternalsConfig;
use crate::model::FormatDescriptor;
use tracing::debug;
use uuid::Uuid;

/// Ordered, non-empty list of steps whose contracts line up.
#[derive(Debug, Clone)]
pub struct Format {
    uuid: Uuid,
    name: String,
    steps: Vec<Step>,
}

impl Format {
    /// Build and validate a format.
    ///
    /// # Errors
    ///
    /// Returns error if a step is unknown or misconfigured, the list is
    /// empty, a step is in a position it does not support, or a step does not
    /// accept what its predecessor produces.
    pub fn from_descriptor(descriptor: &FormatDescriptor, externals: &ExternalsConfig) -> Result<Self, FormatError> {
        let steps = descriptor
            .steps
            .iter()
            .map(|step| Step::from_descriptor(step, externals))
            .collect::<Result<Vec<_>, _>>()?;

        let Some((first, rest)) = steps.split_first() else {
            return Err(FormatError::EmptyFormat(descriptor.name.clone()));
        };
        if !first.can_be_first() {
            return Err(FormatError::CannotBeFirst(first.name().to_string()));
        }
        let mut produced = first.output();
        for step in rest {
            if !step.can_follow() {
                return Err(FormatError::CannotFollow(step.name().to_string()));
            }
            if !step.accepts(&produced) {
                return Err(FormatError::Incompatible {
                    step: step.name().to_string(),
                    format: produced,
                });
            }
            produced = step.output();
        }

        Ok(Self {
            uuid: descriptor.uuid,
            name: descriptor.name.clone(),
            steps,
        })
    }

    /// Format identity.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the final file.
    #[must_use]
    pub fn output(&self) -> FileFormat {
        self.steps.last().map_or(FileFormat::JSON, Step::output)
    }

    /// Steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Run every step in order.
    ///
    /// # Errors
    ///
    /// Returns the first step failure.
    pub async fn execute(&self, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        let Some((first, rest)) = self.steps.split_first() else {
            return Err(PipelineError::step("format", format!("format '{}' has no steps", self.name)));
        };
        let mut file = first.execute_first(ctx).await?;
        debug!(step = first.name(), format = %file.format, size = file.size(), "Step finished");
        for step in rest {
            file = step.execute_follow(file, ctx).await?;
            debug!(step = step.name(), format = %file.format, size = file.size(), "Step finished");
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExternalCommand, TemplatingConfig};
    use crate::context::DocumentContext;
    use crate::model::StepDescriptor;
    use crate::templating::Templating;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn descriptor(steps: Vec<StepDescriptor>) -> FormatDescriptor {
        FormatDescriptor {
            uuid: Uuid::new_v4(),
            name: "Test".into(),
            steps,
        }
    }

    fn build(steps: Vec<StepDescriptor>) -> Result<Format, FormatError> {
        Format::from_descriptor(&descriptor(steps), &ExternalsConfig::default())
    }

    fn context(dir: &TempDir, raw: serde_json::Value) -> RenderContext {
        RenderContext {
            raw: Arc::new(raw),
            document: Arc::new(DocumentContext::default()),
            template_dir: dir.path().to_path_buf(),
            templating: Arc::new(Templating::new(&TemplatingConfig::default()).unwrap()),
        }
    }

    #[test]
    fn test_follow_only_step_cannot_be_first() {
        let err = build(vec![StepDescriptor::new("wkhtmltopdf")]).unwrap_err();
        assert_eq!(err, FormatError::CannotBeFirst("wkhtmltopdf".into()));
    }

    #[test]
    fn test_first_only_step_cannot_follow() {
        let err = build(vec![StepDescriptor::new("json"), StepDescriptor::new("json")]).unwrap_err();
        assert_eq!(err, FormatError::CannotFollow("json".into()));
    }

    #[test]
    fn test_incompatible_chain_is_rejected() {
        let err = build(vec![StepDescriptor::new("json"), StepDescriptor::new("wkhtmltopdf")]).unwrap_err();
        assert_eq!(
            err,
            FormatError::Incompatible {
                step: "wkhtmltopdf".into(),
                format: FileFormat::JSON,
            }
        );
    }

    #[test]
    fn test_empty_and_unknown() {
        assert_eq!(build(vec![]).unwrap_err(), FormatError::EmptyFormat("Test".into()));
        assert_eq!(
            build(vec![StepDescriptor::new("json"), StepDescriptor::new("docbook")]).unwrap_err(),
            FormatError::UnknownStep("docbook".into())
        );
    }

    #[test]
    fn test_output_is_last_step_output() {
        let format = build(vec![
            StepDescriptor::new("jinja").with_option("template", "index.html.j2"),
            StepDescriptor::new("wkhtmltopdf"),
            StepDescriptor::new("archive").with_option("type", "tar").with_option("compression", "gzip"),
        ])
        .unwrap();
        assert_eq!(format.output(), FileFormat::TAR_GZ);
        assert_eq!(format.steps().len(), 3);
    }

    #[tokio::test]
    async fn test_json_format_reproduces_context() {
        let dir = TempDir::new().unwrap();
        let raw = json!({"questionnaire": {"name": "Plan", "replies": {}}, "b": [1, 2]});
        let format = build(vec![StepDescriptor::new("json")]).unwrap();

        let file = format.execute(&context(&dir, raw.clone())).await.unwrap();

        assert_eq!(file.format, FileFormat::JSON);
        let parsed: serde_json::Value = serde_json::from_slice(&file.content).unwrap();
        assert_eq!(parsed, raw);
    }

    #[tokio::test]
    async fn test_steps_chain_through_converter() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html.j2"), "<h1>{{ ctx.title }}</h1>").unwrap();
        let mut externals = ExternalsConfig::default();
        externals.wkhtmltopdf = ExternalCommand::new(&["sh", "-c", "printf '%%PDF-'; cat", "wkhtmltopdf"]);

        let format = Format::from_descriptor(
            &descriptor(vec![
                StepDescriptor::new("jinja").with_option("template", "index.html.j2"),
                StepDescriptor::new("wkhtmltopdf"),
            ]),
            &externals,
        )
        .unwrap();

        let file = format.execute(&context(&dir, json!({"title": "Plan"}))).await.unwrap();
        assert_eq!(file.format, FileFormat::PDF);
        assert_eq!(file.content, b"%PDF-<h1>Plan</h1>");
    }

    #[tokio::test]
    async fn test_template_failure_is_user_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("t.j2"), "{{ fail('Missing project name') }}").unwrap();
        let format = build(vec![StepDescriptor::new("jinja")
            .with_option("template", "t.j2")
            .with_option("extension", "txt")])
        .unwrap();

        let err = format.execute(&context(&dir, json!({}))).await.unwrap_err();
        assert!(err.is_user_failure());
        assert_eq!(err.step_name(), "jinja");
        assert_eq!(err.to_string(), "Missing project name");
    }
}
