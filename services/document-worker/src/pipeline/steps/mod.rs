//! Step kinds and their input/output contracts.

pub mod archive;
pub mod docx;
pub mod excel;
pub mod external;
pub mod jinja;
pub mod json;
pub mod rdf;

use super::error::{FormatError, PipelineError};
use super::file::{DocumentFile, FileFormat};
use super::RenderContext;
use crate::config::ExternalsConfig;
use crate::model::StepDescriptor;
use std::collections::HashMap;

pub use archive::ArchiveStep;
pub use docx::EnrichDocxStep;
pub use excel::ExcelStep;
pub use external::{PandocStep, WkhtmltopdfStep};
pub use jinja::JinjaStep;
pub use json::JsonStep;
pub use rdf::RdfConvertStep;

/// Options of one step, bound to the step name for error reporting.
pub(crate) struct StepOptions<'a> {
    step: &'static str,
    options: &'a HashMap<String, String>,
}

impl<'a> StepOptions<'a> {
    pub(crate) const fn new(step: &'static str, options: &'a HashMap<String, String>) -> Self {
        Self { step, options }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a str> {
        self.options.get(key).map(String::as_str).filter(|value| !value.is_empty())
    }

    pub(crate) fn require(&self, key: &str) -> Result<&'a str, FormatError> {
        self.get(key).ok_or_else(|| FormatError::missing(self.step, key))
    }

    /// Options whose key starts with `prefix`, with the prefix stripped.
    pub(crate) fn prefixed(&self, prefix: &str) -> Vec<(&'a str, &'a str)> {
        let mut matched: Vec<_> = self
            .options
            .iter()
            .filter_map(|(key, value)| key.strip_prefix(prefix).map(|rest| (rest, value.as_str())))
            .collect();
        matched.sort_unstable();
        matched
    }
}

/// Check the incoming file before a following step runs.
pub(crate) fn require_input(
    step: &'static str,
    file: &DocumentFile,
    accepts: impl Fn(&FileFormat) -> bool,
) -> Result<(), PipelineError> {
    if accepts(&file.format) {
        Ok(())
    } else {
        Err(PipelineError::step(step, format!("cannot process {} files", file.format)))
    }
}

/// One conversion stage of a format.
#[derive(Debug, Clone)]
pub enum Step {
    /// Raw context as JSON.
    Json(JsonStep),
    /// Jinja template rendered against the context.
    Jinja(JinjaStep),
    /// HTML to PDF.
    Wkhtmltopdf(WkhtmltopdfStep),
    /// Markup conversion.
    Pandoc(PandocStep),
    /// ZIP or TAR bundle.
    Archive(ArchiveStep),
    /// JSON workbook description to XLSX.
    Excel(ExcelStep),
    /// RDF serialization change.
    RdfConvert(RdfConvertStep),
    /// DOCX parts rewritten from templates.
    EnrichDocx(EnrichDocxStep),
}

impl Step {
    /// Build a step from its descriptor.
    ///
    /// # Errors
    ///
    /// Returns error for an unknown step name or invalid options.
    pub fn from_descriptor(descriptor: &StepDescriptor, externals: &ExternalsConfig) -> Result<Self, FormatError> {
        let options = |name| StepOptions::new(name, &descriptor.options);
        Ok(match descriptor.name.as_str() {
            JsonStep::NAME => Self::Json(JsonStep),
            JinjaStep::NAME => Self::Jinja(JinjaStep::new(&options(JinjaStep::NAME))?),
            WkhtmltopdfStep::NAME => Self::Wkhtmltopdf(WkhtmltopdfStep::new(
                &options(WkhtmltopdfStep::NAME),
                &externals.wkhtmltopdf,
            )),
            PandocStep::NAME => Self::Pandoc(PandocStep::new(&options(PandocStep::NAME), &externals.pandoc)?),
            ArchiveStep::NAME => Self::Archive(ArchiveStep::new(&options(ArchiveStep::NAME))?),
            ExcelStep::NAME => Self::Excel(ExcelStep),
            RdfConvertStep::NAME => Self::RdfConvert(RdfConvertStep::new(&options(RdfConvertStep::NAME))?),
            EnrichDocxStep::NAME => Self::EnrichDocx(EnrichDocxStep::new(&options(EnrichDocxStep::NAME))?),
            other => return Err(FormatError::UnknownStep(other.to_string())),
        })
    }

    /// Step name as used in descriptors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Json(_) => JsonStep::NAME,
            Self::Jinja(_) => JinjaStep::NAME,
            Self::Wkhtmltopdf(_) => WkhtmltopdfStep::NAME,
            Self::Pandoc(_) => PandocStep::NAME,
            Self::Archive(_) => ArchiveStep::NAME,
            Self::Excel(_) => ExcelStep::NAME,
            Self::RdfConvert(_) => RdfConvertStep::NAME,
            Self::EnrichDocx(_) => EnrichDocxStep::NAME,
        }
    }

    /// Whether the step produces the initial file from the context.
    #[must_use]
    pub const fn can_be_first(&self) -> bool {
        matches!(self, Self::Json(_) | Self::Jinja(_))
    }

    /// Whether the step transforms a file produced by a previous step.
    #[must_use]
    pub const fn can_follow(&self) -> bool {
        !self.can_be_first()
    }

    /// Whether a following step accepts files of `format`.
    #[must_use]
    pub fn accepts(&self, format: &FileFormat) -> bool {
        match self {
            Self::Json(_) | Self::Jinja(_) => false,
            Self::Wkhtmltopdf(_) => WkhtmltopdfStep::accepts(format),
            Self::Pandoc(step) => step.accepts(format),
            Self::Archive(_) => true,
            Self::Excel(_) => ExcelStep::accepts(format),
            Self::RdfConvert(step) => step.accepts(format),
            Self::EnrichDocx(_) => EnrichDocxStep::accepts(format),
        }
    }

    /// Format of the file the step produces.
    #[must_use]
    pub fn output(&self) -> FileFormat {
        match self {
            Self::Json(_) => FileFormat::JSON,
            Self::Jinja(step) => step.output(),
            Self::Wkhtmltopdf(_) => FileFormat::PDF,
            Self::Pandoc(step) => step.output(),
            Self::Archive(step) => step.output(),
            Self::Excel(_) => FileFormat::XLSX,
            Self::RdfConvert(step) => step.output(),
            Self::EnrichDocx(_) => FileFormat::DOCX,
        }
    }

    /// Produce the initial file.
    ///
    /// # Errors
    ///
    /// Returns error if the step fails or cannot be first.
    pub async fn execute_first(&self, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        match self {
            Self::Json(step) => step.execute(ctx),
            Self::Jinja(step) => step.execute(ctx).await,
            _ => Err(PipelineError::step(self.name(), "cannot be the first step")),
        }
    }

    /// Transform the file of the previous step.
    ///
    /// # Errors
    ///
    /// Returns error if the step fails, does not accept the file, or can only
    /// be first.
    pub async fn execute_follow(&self, file: DocumentFile, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        match self {
            Self::Json(_) | Self::Jinja(_) => Err(PipelineError::step(self.name(), "can only be the first step")),
            Self::Wkhtmltopdf(step) => step.execute(file, ctx).await,
            Self::Pandoc(step) => step.execute(file, ctx).await,
            Self::Archive(step) => step.execute(file, ctx).await,
            Self::Excel(step) => step.execute(file).await,
            Self::RdfConvert(step) => step.execute(file).await,
            Self::EnrichDocx(step) => step.execute(file, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(descriptor: StepDescriptor) -> Result<Step, FormatError> {
        Step::from_descriptor(&descriptor, &ExternalsConfig::default())
    }

    #[test]
    fn test_factory_knows_every_step() {
        let steps = [
            StepDescriptor::new("json"),
            StepDescriptor::new("jinja").with_option("template", "index.html.j2"),
            StepDescriptor::new("wkhtmltopdf"),
            StepDescriptor::new("pandoc").with_option("from", "html").with_option("to", "docx"),
            StepDescriptor::new("archive"),
            StepDescriptor::new("excel"),
            StepDescriptor::new("rdf-convert").with_option("from", "turtle").with_option("to", "n-triples"),
            StepDescriptor::new("enrich-docx").with_option("rewrite:word/document.xml", "document.xml.j2"),
        ];
        for descriptor in steps {
            let step = build(descriptor.clone()).unwrap();
            assert_eq!(step.name(), descriptor.name);
        }
    }

    #[test]
    fn test_unknown_step_is_rejected() {
        assert_eq!(
            build(StepDescriptor::new("docbook")).unwrap_err(),
            FormatError::UnknownStep("docbook".into())
        );
    }

    #[test]
    fn test_contracts() {
        let json = build(StepDescriptor::new("json")).unwrap();
        assert!(json.can_be_first());
        assert!(!json.can_follow());

        let pdf = build(StepDescriptor::new("wkhtmltopdf")).unwrap();
        assert!(!pdf.can_be_first());
        assert!(pdf.accepts(&FileFormat::HTML));
        assert!(!pdf.accepts(&FileFormat::JSON));
        assert_eq!(pdf.output(), FileFormat::PDF);

        let excel = build(StepDescriptor::new("excel")).unwrap();
        assert!(excel.accepts(&FileFormat::JSON));
        assert_eq!(excel.output(), FileFormat::XLSX);
    }

    #[test]
    fn test_prefixed_options_are_sorted() {
        let options: HashMap<String, String> = [
            ("rewrite:word/footer1.xml".to_string(), "footer.j2".to_string()),
            ("rewrite:word/document.xml".to_string(), "document.j2".to_string()),
            ("other".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        let options = StepOptions::new("enrich-docx", &options);
        assert_eq!(
            options.prefixed("rewrite:"),
            [("word/document.xml", "document.j2"), ("word/footer1.xml", "footer.j2")]
        );
    }
}
