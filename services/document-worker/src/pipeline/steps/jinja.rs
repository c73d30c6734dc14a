//! Template expansion.

use super::StepOptions;
use crate::pipeline::error::{FormatError, PipelineError};
use crate::pipeline::file::{DocumentFile, FileFormat};
use crate::pipeline::RenderContext;
use crate::templating::TemplateError;
use std::sync::Arc;

/// Renders a template file of the template directory.
#[derive(Debug, Clone)]
pub struct JinjaStep {
    template: String,
    output: FileFormat,
}

impl JinjaStep {
    pub(crate) const NAME: &'static str = "jinja";

    pub(crate) fn new(options: &StepOptions<'_>) -> Result<Self, FormatError> {
        let template = options.require("template")?.to_string();
        let extension = options.get("extension").unwrap_or("html");
        let output = match (options.get("content-type"), FileFormat::by_extension(extension)) {
            (None, Some(known)) => known,
            (content_type, _) => FileFormat::custom(extension, content_type.unwrap_or("text/plain")),
        };
        Ok(Self { template, output })
    }

    pub(crate) fn output(&self) -> FileFormat {
        self.output.clone()
    }

    pub(crate) async fn execute(&self, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        let templating = Arc::clone(&ctx.templating);
        let raw = Arc::clone(&ctx.raw);
        let document = Arc::clone(&ctx.document);
        let dir = ctx.template_dir.clone();
        let template = self.template.clone();

        let rendered = tokio::task::spawn_blocking(move || templating.render(&dir, &template, &raw, &document, &[]))
            .await
            .map_err(|err| PipelineError::step(Self::NAME, format!("render task failed: {err}")))?;
        match rendered {
            Ok(text) => Ok(DocumentFile::new(self.output.clone(), text.into_bytes())),
            Err(err) => Err(template_failure(Self::NAME, err)),
        }
    }
}

pub(crate) fn template_failure(step: &'static str, err: TemplateError) -> PipelineError {
    match err {
        TemplateError::UserFailure(message) => PipelineError::UserFailure { step, message },
        other => PipelineError::step(step, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn build(options: &[(&str, &str)]) -> Result<JinjaStep, FormatError> {
        let options: HashMap<String, String> = options
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        JinjaStep::new(&StepOptions::new(JinjaStep::NAME, &options))
    }

    #[test]
    fn test_output_defaults_to_html() {
        let step = build(&[("template", "index.html.j2")]).unwrap();
        assert_eq!(step.output(), FileFormat::HTML);
        assert_eq!(step.output().content_type(), "text/html");
    }

    #[test]
    fn test_output_follows_extension_and_content_type() {
        let step = build(&[("template", "t.j2"), ("extension", "md")]).unwrap();
        assert_eq!(step.output(), FileFormat::MARKDOWN);

        let step = build(&[("template", "t.j2"), ("extension", "csv"), ("content-type", "text/csv")]).unwrap();
        assert_eq!(step.output().name(), "csv");
        assert_eq!(step.output().content_type(), "text/csv");
    }

    #[test]
    fn test_template_option_is_required() {
        assert_eq!(build(&[]).unwrap_err(), FormatError::missing("jinja", "template"));
    }
}
