//! File names of generated documents.

use crate::config::NamingStrategy;
use regex::Regex;
use uuid::Uuid;

/// Derives stored file names from document titles.
#[derive(Debug, Clone)]
pub struct FileNamer {
    strategy: NamingStrategy,
    unsafe_chars: Regex,
    slug_separators: Regex,
}

impl FileNamer {
    /// Namer for a strategy.
    ///
    /// # Errors
    ///
    /// Returns error if the name patterns fail to compile.
    pub fn new(strategy: NamingStrategy) -> Result<Self, regex::Error> {
        Ok(Self {
            strategy,
            unsafe_chars: Regex::new(r"[^\w\s.\-]")?,
            slug_separators: Regex::new(r"[^a-z0-9]+")?,
        })
    }

    /// `<name>.<extension>`; the UUID stands in when the title yields nothing.
    #[must_use]
    pub fn file_name(&self, document_uuid: Uuid, title: &str, extension: &str) -> String {
        let stem = match self.strategy {
            NamingStrategy::Uuid => String::new(),
            NamingStrategy::Sanitize => self.sanitize(title),
            NamingStrategy::Slugify => self.slugify(title),
        };
        let stem = if stem.is_empty() { document_uuid.to_string() } else { stem };
        format!("{stem}.{extension}")
    }

    fn sanitize(&self, title: &str) -> String {
        let cleaned = self.unsafe_chars.replace_all(title, "");
        cleaned.trim().trim_start_matches('.').trim().to_string()
    }

    fn slugify(&self, title: &str) -> String {
        let lower = title.to_lowercase();
        self.slug_separators.replace_all(&lower, "-").trim_matches('-').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: Uuid = Uuid::from_u128(0xabc);

    fn name(strategy: NamingStrategy, title: &str) -> String {
        FileNamer::new(strategy).unwrap().file_name(DOC, title, "pdf")
    }

    #[test]
    fn test_uuid_strategy() {
        assert_eq!(name(NamingStrategy::Uuid, "Plan"), format!("{DOC}.pdf"));
    }

    #[test]
    fn test_sanitize_strips_unsafe_characters() {
        assert_eq!(name(NamingStrategy::Sanitize, "Data/Plan: v2 (final)"), "DataPlan v2 final.pdf");
        assert_eq!(name(NamingStrategy::Sanitize, "../../etc"), "etc.pdf");
        assert_eq!(name(NamingStrategy::Sanitize, "Plán"), "Plán.pdf");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(name(NamingStrategy::Slugify, "  Data Management Plan #2 "), "data-management-plan-2.pdf");
    }

    #[test]
    fn test_empty_result_falls_back_to_uuid() {
        assert_eq!(name(NamingStrategy::Sanitize, "///"), format!("{DOC}.pdf"));
        assert_eq!(name(NamingStrategy::Slugify, "***"), format!("{DOC}.pdf"));
    }
}
