//! Rewrite parts of a DOCX package from templates.
//!
//! Options `rewrite:<part>` name the template rendering that part, e.g.
//! `rewrite:word/document.xml = src/document.xml.j2`. The part's current
//! text is available to the template as `original`.

use super::jinja::template_failure;
use super::{require_input, StepOptions};
use crate::pipeline::error::{FormatError, PipelineError};
use crate::pipeline::file::{DocumentFile, FileFormat};
use crate::pipeline::RenderContext;
use crate::templating::TemplateError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Enriches a DOCX produced by a previous step.
#[derive(Debug, Clone)]
pub struct EnrichDocxStep {
    rewrites: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
enum EnrichError {
    #[error("invalid DOCX package: {0}")]
    Package(#[from] zip::result::ZipError),
    #[error("invalid DOCX package: {0}")]
    Io(#[from] std::io::Error),
    #[error("part '{0}' not found in DOCX")]
    MissingPart(String),
    #[error("part '{0}' is not UTF-8 text")]
    Binary(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl EnrichDocxStep {
    pub(crate) const NAME: &'static str = "enrich-docx";

    pub(crate) fn new(options: &StepOptions<'_>) -> Result<Self, FormatError> {
        let rewrites: BTreeMap<String, String> = options
            .prefixed("rewrite:")
            .into_iter()
            .map(|(part, template)| (part.to_string(), template.to_string()))
            .collect();
        if rewrites.is_empty() {
            return Err(FormatError::missing(Self::NAME, "rewrite:<part>"));
        }
        Ok(Self { rewrites })
    }

    pub(crate) fn accepts(format: &FileFormat) -> bool {
        *format == FileFormat::DOCX
    }

    pub(crate) async fn execute(&self, file: DocumentFile, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        require_input(Self::NAME, &file, Self::accepts)?;
        let rewrites = self.rewrites.clone();
        let ctx = ctx.clone();
        let enriched = tokio::task::spawn_blocking(move || enrich(&file.content, &rewrites, &ctx))
            .await
            .map_err(|err| PipelineError::step(Self::NAME, format!("enrichment task failed: {err}")))?;
        match enriched {
            Ok(content) => Ok(DocumentFile::new(FileFormat::DOCX, content)),
            Err(EnrichError::Template(err)) => Err(template_failure(Self::NAME, err)),
            Err(err) => Err(PipelineError::step(Self::NAME, err.to_string())),
        }
    }
}

fn enrich(package: &[u8], rewrites: &BTreeMap<String, String>, ctx: &RenderContext) -> Result<Vec<u8>, EnrichError> {
    let mut archive = ZipArchive::new(Cursor::new(package))?;
    let names: BTreeSet<&str> = archive.file_names().collect();
    if let Some(missing) = rewrites.keys().find(|part| !names.contains(part.as_str())) {
        return Err(EnrichError::MissingPart(missing.clone()));
    }
    drop(names);

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for index in 0..archive.len() {
        let name = archive.by_index_raw(index)?.name().to_string();
        let Some(template) = rewrites.get(&name) else {
            writer.raw_copy_file(archive.by_index_raw(index)?)?;
            continue;
        };

        let mut raw = Vec::new();
        archive.by_index(index)?.read_to_end(&mut raw)?;
        let original = String::from_utf8(raw).map_err(|_| EnrichError::Binary(name.clone()))?;
        let rendered = ctx.templating.render(
            &ctx.template_dir,
            template,
            &ctx.raw,
            &ctx.document,
            &[("original", minijinja::Value::from_safe_string(original))],
        )?;
        writer.start_file(name.as_str(), options)?;
        writer.write_all(rendered.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplatingConfig;
    use crate::context::DocumentContext;
    use crate::templating::Templating;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn docx() -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("[Content_Types].xml", options).unwrap();
        writer.write_all(b"<Types/>").unwrap();
        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(b"<w:body>TITLE</w:body>").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn context(dir: &TempDir) -> RenderContext {
        RenderContext {
            raw: Arc::new(serde_json::json!({"title": "Data plan"})),
            document: Arc::new(DocumentContext::default()),
            template_dir: dir.path().to_path_buf(),
            templating: Arc::new(Templating::new(&TemplatingConfig::default()).unwrap()),
        }
    }

    fn step(part: &str) -> EnrichDocxStep {
        let options: HashMap<String, String> = [(format!("rewrite:{part}"), "document.j2".to_string())]
            .into_iter()
            .collect();
        EnrichDocxStep::new(&StepOptions::new(EnrichDocxStep::NAME, &options)).unwrap()
    }

    fn read(package: &[u8], part: &str) -> String {
        let mut archive = ZipArchive::new(Cursor::new(package)).unwrap();
        let mut out = String::new();
        archive.by_name(part).unwrap().read_to_string(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_rewrites_part_and_keeps_others() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("document.j2"),
            "{{ original | replace('TITLE', ctx.title) }}",
        )
        .unwrap();

        let out = step("word/document.xml")
            .execute(DocumentFile::new(FileFormat::DOCX, docx()), &context(&dir))
            .await
            .unwrap();

        assert_eq!(read(&out.content, "word/document.xml"), "<w:body>Data plan</w:body>");
        assert_eq!(read(&out.content, "[Content_Types].xml"), "<Types/>");
    }

    #[tokio::test]
    async fn test_missing_part_fails() {
        let dir = TempDir::new().unwrap();
        let err = step("word/footer1.xml")
            .execute(DocumentFile::new(FileFormat::DOCX, docx()), &context(&dir))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("word/footer1.xml"));
    }

    #[test]
    fn test_requires_a_rewrite() {
        let options = HashMap::new();
        assert!(EnrichDocxStep::new(&StepOptions::new(EnrichDocxStep::NAME, &options)).is_err());
    }
}
