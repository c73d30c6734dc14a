//! Typed document files passed between steps.

use std::borrow::Cow;
use std::fmt;

/// Name, MIME type and extension of a file kind.
///
/// Formats compare by name only.
#[derive(Debug, Clone, Eq)]
pub struct FileFormat {
    name: Cow<'static, str>,
    content_type: Cow<'static, str>,
    extension: Cow<'static, str>,
}

impl PartialEq for FileFormat {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl std::hash::Hash for FileFormat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

macro_rules! formats {
    ($($konst:ident => ($name:literal, $content_type:literal, $extension:literal)),* $(,)?) => {
        impl FileFormat {
            $(
                #[doc = concat!("`", $name, "` (", $content_type, ")")]
                pub const $konst: Self = Self::known($name, $content_type, $extension);
            )*

            const KNOWN: &'static [Self] = &[$(Self::$konst),*];
        }
    };
}

formats! {
    JSON => ("json", "application/json", "json"),
    HTML => ("html", "text/html", "html"),
    PDF => ("pdf", "application/pdf", "pdf"),
    DOCX => ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document", "docx"),
    ODT => ("odt", "application/vnd.oasis.opendocument.text", "odt"),
    MARKDOWN => ("markdown", "text/markdown", "md"),
    LATEX => ("latex", "application/x-tex", "tex"),
    RST => ("rst", "text/x-rst", "rst"),
    ASCIIDOC => ("asciidoc", "text/asciidoc", "adoc"),
    RTF => ("rtf", "application/rtf", "rtf"),
    EPUB => ("epub", "application/epub+zip", "epub"),
    PLAIN => ("plain", "text/plain", "txt"),
    XLSX => ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", "xlsx"),
    ZIP => ("zip", "application/zip", "zip"),
    TAR => ("tar", "application/x-tar", "tar"),
    TAR_GZ => ("tar.gz", "application/gzip", "tar.gz"),
    TURTLE => ("turtle", "text/turtle", "ttl"),
    N_TRIPLES => ("n-triples", "application/n-triples", "nt"),
    N_QUADS => ("n-quads", "application/n-quads", "nq"),
    TRIG => ("trig", "application/trig", "trig"),
    RDF_XML => ("rdf-xml", "application/rdf+xml", "rdf"),
}

impl FileFormat {
    const fn known(name: &'static str, content_type: &'static str, extension: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            content_type: Cow::Borrowed(content_type),
            extension: Cow::Borrowed(extension),
        }
    }

    /// A format not known in advance, e.g. declared by a template step.
    #[must_use]
    pub fn custom(extension: impl Into<String>, content_type: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            name: Cow::Owned(extension.clone()),
            content_type: Cow::Owned(content_type.into()),
            extension: Cow::Owned(extension),
        }
    }

    /// Known format by name.
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        Self::KNOWN.iter().find(|format| format.name == name).cloned()
    }

    /// Known format by file extension.
    #[must_use]
    pub fn by_extension(extension: &str) -> Option<Self> {
        Self::KNOWN.iter().find(|format| format.extension == extension).cloned()
    }

    /// Format name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// MIME type.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// File extension without the dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Bytes tagged with their format.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentFile {
    /// Format of `content`.
    pub format: FileFormat,
    /// Payload.
    pub content: Vec<u8>,
}

impl DocumentFile {
    /// Tag bytes with a format.
    #[must_use]
    pub const fn new(format: FileFormat, content: Vec<u8>) -> Self {
        Self { format, content }
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

impl fmt::Debug for DocumentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentFile")
            .field("format", &self.format.name())
            .field("size", &self.content.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name_and_extension() {
        assert_eq!(FileFormat::by_name("docx"), Some(FileFormat::DOCX));
        assert_eq!(FileFormat::by_extension("md"), Some(FileFormat::MARKDOWN));
        assert_eq!(FileFormat::by_extension("tar.gz").unwrap().content_type(), "application/gzip");
        assert!(FileFormat::by_name("pptx").is_none());
    }

    #[test]
    fn test_custom_format_compares_by_name() {
        let custom = FileFormat::custom("html", "text/html; charset=utf-8");
        assert_eq!(custom, FileFormat::HTML);
        assert_ne!(FileFormat::custom("csv", "text/csv"), FileFormat::PLAIN);
    }
}
