//! Database view of a document template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// One step of a format as written in the template descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDescriptor {
    /// Step kind.
    pub name: String,
    /// String options interpreted by the step.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl StepDescriptor {
    /// Step without options.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: HashMap::new(),
        }
    }

    /// Add an option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A named output format: an ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Format identity referenced by documents.
    pub uuid: Uuid,
    /// Display name, e.g. "PDF".
    pub name: String,
    /// Steps executed in order.
    pub steps: Vec<StepDescriptor>,
}

/// A row of the `document_template` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    /// Template identifier, e.g. `org:template:1.0.0`.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Formats the template can produce.
    #[sqlx(json)]
    pub formats: Vec<FormatDescriptor>,
    /// Last modification of the descriptor.
    pub updated_at: DateTime<Utc>,
}

/// A text file of a template, stored inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFile {
    /// File identity.
    pub uuid: Uuid,
    /// Path relative to the template root.
    pub file_name: String,
    /// File content.
    pub content: String,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

/// A binary asset of a template, stored in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TemplateAsset {
    /// Asset identity; also its object key suffix.
    pub uuid: Uuid,
    /// Path relative to the template root.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub file_size: i64,
    /// Last modification.
    pub updated_at: DateTime<Utc>,
}

/// Descriptor, files and assets of a template as currently stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateComposite {
    /// The template record.
    pub template: TemplateRecord,
    /// Text files keyed by UUID.
    pub files: BTreeMap<Uuid, TemplateFile>,
    /// Binary assets keyed by UUID.
    pub assets: BTreeMap<Uuid, TemplateAsset>,
}

impl TemplateComposite {
    /// Assemble a composite from fetched rows.
    #[must_use]
    pub fn new(
        template: TemplateRecord,
        files: impl IntoIterator<Item = TemplateFile>,
        assets: impl IntoIterator<Item = TemplateAsset>,
    ) -> Self {
        Self {
            template,
            files: files.into_iter().map(|file| (file.uuid, file)).collect(),
            assets: assets.into_iter().map(|asset| (asset.uuid, asset)).collect(),
        }
    }

    /// The descriptor of a format.
    #[must_use]
    pub fn format(&self, uuid: Uuid) -> Option<&FormatDescriptor> {
        self.template.formats.iter().find(|format| format.uuid == uuid)
    }
}
