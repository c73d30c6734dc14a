//! Bundle the document, optionally with template files, into ZIP or TAR.

use super::StepOptions;
use crate::pipeline::error::{FormatError, PipelineError};
use crate::pipeline::file::{DocumentFile, FileFormat};
use crate::pipeline::RenderContext;
use flate2::write::GzEncoder;
use std::io::{Cursor, Write};
use std::path::{Component, Path};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Zip { deflated: bool },
    Tar { gzip: bool },
}

/// Packs the incoming file.
#[derive(Debug, Clone)]
pub struct ArchiveStep {
    container: Container,
    name: Option<String>,
    include: Vec<String>,
}

impl ArchiveStep {
    pub(crate) const NAME: &'static str = "archive";

    pub(crate) fn new(options: &StepOptions<'_>) -> Result<Self, FormatError> {
        let compression = options.get("compression");
        let container = match options.get("type").unwrap_or("zip") {
            "zip" => Container::Zip {
                deflated: match compression.unwrap_or("deflated") {
                    "deflated" => true,
                    "stored" => false,
                    other => return Err(invalid_compression(other)),
                },
            },
            "tar" => Container::Tar {
                gzip: match compression.unwrap_or("none") {
                    "gzip" => true,
                    "none" => false,
                    other => return Err(invalid_compression(other)),
                },
            },
            other => {
                return Err(FormatError::invalid(Self::NAME, "type", format!("unsupported archive '{other}'")));
            }
        };

        let name = options.get("name").map(str::to_string);
        if let Some(name) = &name {
            check_relative(name).map_err(|message| FormatError::invalid(Self::NAME, "name", message))?;
        }
        let include = options
            .get("include")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        for item in &include {
            check_relative(item).map_err(|message| FormatError::invalid(Self::NAME, "include", message))?;
        }
        Ok(Self { container, name, include })
    }

    pub(crate) const fn output(&self) -> FileFormat {
        match self.container {
            Container::Zip { .. } => FileFormat::ZIP,
            Container::Tar { gzip: false } => FileFormat::TAR,
            Container::Tar { gzip: true } => FileFormat::TAR_GZ,
        }
    }

    pub(crate) async fn execute(&self, file: DocumentFile, ctx: &RenderContext) -> Result<DocumentFile, PipelineError> {
        let document_name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("document.{}", file.format.extension()));
        let mut entries = vec![(document_name, file.content)];
        for item in &self.include {
            let content = tokio::fs::read(ctx.template_dir.join(item))
                .await
                .map_err(|err| PipelineError::step(Self::NAME, format!("cannot include '{item}': {err}")))?;
            entries.push((item.clone(), content));
        }

        let container = self.container;
        let packed = tokio::task::spawn_blocking(move || pack(container, &entries))
            .await
            .map_err(|err| PipelineError::step(Self::NAME, format!("archive task failed: {err}")))?
            .map_err(|err| PipelineError::step(Self::NAME, err.to_string()))?;
        Ok(DocumentFile::new(self.output(), packed))
    }
}

fn invalid_compression(value: &str) -> FormatError {
    FormatError::invalid(ArchiveStep::NAME, "compression", format!("unsupported compression '{value}'"))
}

fn check_relative(path: &str) -> Result<(), String> {
    let normal = Path::new(path)
        .components()
        .all(|component| matches!(component, Component::Normal(_)));
    if normal && !path.is_empty() {
        Ok(())
    } else {
        Err(format!("'{path}' is not a relative path inside the template"))
    }
}

fn pack(container: Container, entries: &[(String, Vec<u8>)]) -> std::io::Result<Vec<u8>> {
    match container {
        Container::Zip { deflated } => {
            let method = if deflated {
                CompressionMethod::Deflated
            } else {
                CompressionMethod::Stored
            };
            let options = SimpleFileOptions::default().compression_method(method);
            let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
            for (name, content) in entries {
                zip.start_file(name.as_str(), options)?;
                zip.write_all(content)?;
            }
            Ok(zip.finish()?.into_inner())
        }
        Container::Tar { gzip: false } => {
            let mut tar = tar::Builder::new(Vec::new());
            append_all(&mut tar, entries)?;
            tar.into_inner()
        }
        Container::Tar { gzip: true } => {
            let gz = GzEncoder::new(Vec::new(), flate2::Compression::default());
            let mut tar = tar::Builder::new(gz);
            append_all(&mut tar, entries)?;
            tar.into_inner()?.finish()
        }
    }
}

fn append_all<W: Write>(tar: &mut tar::Builder<W>, entries: &[(String, Vec<u8>)]) -> std::io::Result<()> {
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        tar.append_data(&mut header, name, content.as_slice())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::collections::HashMap;
    use std::io::Read;

    fn build(options: &[(&str, &str)]) -> Result<ArchiveStep, FormatError> {
        let options: HashMap<String, String> = options
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        ArchiveStep::new(&StepOptions::new(ArchiveStep::NAME, &options))
    }

    fn entries() -> Vec<(String, Vec<u8>)> {
        vec![
            ("report.pdf".to_string(), b"%PDF-1.4".to_vec()),
            ("assets/logo.svg".to_string(), b"<svg/>".to_vec()),
        ]
    }

    #[test]
    fn test_zip_contains_document_and_includes() {
        let packed = pack(Container::Zip { deflated: true }, &entries()).unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(packed)).unwrap();
        assert_eq!(zip.len(), 2);
        let mut content = String::new();
        zip.by_name("assets/logo.svg").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "<svg/>");
    }

    #[test]
    fn test_tar_gz_round_trips_entries() {
        let packed = pack(Container::Tar { gzip: true }, &entries()).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(packed.as_slice()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names, ["report.pdf", "assets/logo.svg"]);
    }

    #[test]
    fn test_options_select_container() {
        assert_eq!(build(&[]).unwrap().output(), FileFormat::ZIP);
        assert_eq!(build(&[("type", "tar")]).unwrap().output(), FileFormat::TAR);
        assert_eq!(
            build(&[("type", "tar"), ("compression", "gzip")]).unwrap().output(),
            FileFormat::TAR_GZ
        );
        assert!(build(&[("type", "zip"), ("compression", "gzip")]).is_err());
        assert!(build(&[("type", "rar")]).is_err());
    }

    #[test]
    fn test_include_cannot_escape_template_dir() {
        let err = build(&[("include", "style.css, ../secrets.toml")]).unwrap_err();
        assert!(matches!(err, FormatError::InvalidOption { ref option, .. } if option == "include"));
        assert!(build(&[("name", "/etc/passwd")]).is_err());
    }
}
