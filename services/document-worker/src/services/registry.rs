//! Local cache of template files and assets.
//!
//! Each (tenant, template) pair owns one directory under the cache root. A
//! prepare call fetches the current composite from the database and
//! reconciles the directory against it: removed entries are deleted, new ones
//! written, and changed ones rewritten. Files are compared by SHA-256 of their
//! content, assets by their modification time; anything missing on disk is
//! rewritten regardless. Entries unused for the retention period are evicted.

use crate::config::{ExternalsConfig, StorageConfig, TemplatesConfig};
use crate::model::TemplateComposite;
use crate::pipeline::{Format, FormatError};
use crate::storage::{object_key, ObjectStorage, StorageError, TemplateSource};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Template registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Database or object storage failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The cache directory cannot be written.
    #[error("cannot update '{path}': {source}")]
    Io {
        /// Affected path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// No template with that identifier.
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    /// The template has no such format.
    #[error("template '{template}' has no format {format}")]
    FormatNotFound {
        /// Template identifier.
        template: String,
        /// Requested format.
        format: Uuid,
    },
    /// A file name escapes the template directory.
    #[error("invalid template file name '{0}'")]
    InvalidFileName(String),
    /// An asset is listed but absent from object storage.
    #[error("template asset '{0}' is missing from storage")]
    AssetMissing(String),
    /// The requested format cannot be built.
    #[error(transparent)]
    Format(#[from] FormatError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Where and for how long templates are cached.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Cache root.
    pub dir: PathBuf,
    /// Unused entries older than this are evicted.
    pub retention: Duration,
    /// Bucket holding template assets.
    pub bucket: String,
    /// Asset keys are prefixed with the tenant.
    pub multi_tenant: bool,
}

impl RegistrySettings {
    /// Settings from configuration.
    #[must_use]
    pub fn from_config(templates: &TemplatesConfig, storage: &StorageConfig) -> Self {
        Self {
            dir: templates.dir.clone(),
            retention: Duration::days(i64::from(templates.retention_days)),
            bucket: storage.bucket.clone(),
            multi_tenant: storage.multi_tenant,
        }
    }
}

/// Names written and deleted by one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files and assets (re)written.
    pub written: Vec<String>,
    /// Files and assets removed.
    pub deleted: Vec<String>,
}

impl SyncReport {
    /// Whether the directory was already up to date.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        self.written.is_empty() && self.deleted.is_empty()
    }
}

type Formats = HashMap<Uuid, Result<Arc<Format>, FormatError>>;

struct CachedTemplate {
    composite: TemplateComposite,
    digests: HashMap<Uuid, String>,
    formats: Arc<Formats>,
}

struct Slot {
    dir: PathBuf,
    state: tokio::sync::Mutex<Option<CachedTemplate>>,
    last_used: Mutex<DateTime<Utc>>,
    in_use: AtomicUsize,
}

impl Slot {
    fn idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.in_use.load(Ordering::SeqCst) == 0 && *self.last_used.lock() < cutoff
    }
}

/// Keeps a cache entry from being evicted while a document uses it.
struct Lease(Arc<Slot>);

impl Drop for Lease {
    fn drop(&mut self) {
        self.0.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A synchronized template directory, ready for rendering.
pub struct PreparedTemplate {
    template_id: String,
    formats: Arc<Formats>,
    report: SyncReport,
    lease: Lease,
}

impl std::fmt::Debug for PreparedTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTemplate")
            .field("template_id", &self.template_id)
            .field("dir", &self.lease.0.dir)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl PreparedTemplate {
    /// Directory holding the template files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.lease.0.dir
    }

    /// What the synchronization changed.
    #[must_use]
    pub const fn report(&self) -> &SyncReport {
        &self.report
    }

    /// A format of the template.
    ///
    /// # Errors
    ///
    /// Returns error if the template has no such format or it is invalid.
    pub fn format(&self, uuid: Uuid) -> Result<Arc<Format>, RegistryError> {
        match self.formats.get(&uuid) {
            Some(Ok(format)) => Ok(Arc::clone(format)),
            Some(Err(err)) => Err(RegistryError::Format(err.clone())),
            None => Err(RegistryError::FormatNotFound {
                template: self.template_id.clone(),
                format: uuid,
            }),
        }
    }
}

/// Process-wide template cache.
pub struct TemplateRegistry {
    source: Arc<dyn TemplateSource>,
    objects: Arc<dyn ObjectStorage>,
    externals: ExternalsConfig,
    settings: RegistrySettings,
    entries: RwLock<HashMap<(Uuid, String), Arc<Slot>>>,
}

impl std::fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("settings", &self.settings)
            .field("entries", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

impl TemplateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        source: Arc<dyn TemplateSource>,
        objects: Arc<dyn ObjectStorage>,
        externals: ExternalsConfig,
        settings: RegistrySettings,
    ) -> Self {
        Self {
            source,
            objects,
            externals,
            settings,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of cached templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Bring the local copy of a template up to date and mark it in use.
    ///
    /// # Errors
    ///
    /// Returns error if the template does not exist, cannot be fetched, or its
    /// files cannot be written.
    pub async fn prepare_template(&self, tenant_uuid: Uuid, template_id: &str) -> Result<PreparedTemplate, RegistryError> {
        let composite = self
            .source
            .fetch_template(tenant_uuid, template_id)
            .await?
            .ok_or_else(|| RegistryError::TemplateNotFound(template_id.to_string()))?;

        let lease = self.lease(tenant_uuid, template_id);
        let slot = Arc::clone(&lease.0);
        let mut state = slot.state.lock().await;

        let (digests, report) = self.sync(tenant_uuid, &slot.dir, state.as_ref(), &composite).await?;
        let formats = match state.as_ref() {
            Some(cached) if cached.composite.template == composite.template => Arc::clone(&cached.formats),
            _ => Arc::new(self.build_formats(&composite)),
        };
        info!(
            tenant_uuid = %tenant_uuid,
            template_id,
            written = report.written.len(),
            deleted = report.deleted.len(),
            "Template prepared"
        );
        *state = Some(CachedTemplate {
            composite,
            digests,
            formats: Arc::clone(&formats),
        });
        drop(state);

        Ok(PreparedTemplate {
            template_id: template_id.to_string(),
            formats,
            report,
            lease,
        })
    }

    /// Evict entries unused for longer than the retention period.
    ///
    /// Returns the number of evicted entries.
    pub async fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now()).await
    }

    /// [`Self::cleanup`] as of `now`.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.settings.retention;
        let candidates: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter(|(_, slot)| slot.idle_since(cutoff))
            .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
            .collect();

        let mut evicted = 0;
        for (key, slot) in candidates {
            let Ok(mut state) = slot.state.try_lock() else {
                continue;
            };
            if !slot.idle_since(cutoff) {
                continue;
            }
            state.take();
            if let Err(err) = tokio::fs::remove_dir_all(&slot.dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(dir = %slot.dir.display(), error = %err, "Failed to remove cached template");
                }
            }

            let mut entries = self.entries.write();
            let current = entries.get(&key).is_some_and(|entry| Arc::ptr_eq(entry, &slot));
            if current && slot.in_use.load(Ordering::SeqCst) == 0 {
                entries.remove(&key);
                evicted += 1;
                debug!(tenant_uuid = %key.0, template_id = %key.1, "Template evicted");
            }
        }
        if evicted > 0 {
            info!(evicted, "Template cache cleaned up");
        }
        evicted
    }

    fn lease(&self, tenant_uuid: Uuid, template_id: &str) -> Lease {
        let mut entries = self.entries.write();
        let slot = entries
            .entry((tenant_uuid, template_id.to_string()))
            .or_insert_with(|| {
                Arc::new(Slot {
                    dir: self.settings.dir.join(tenant_uuid.to_string()).join(dir_name(template_id)),
                    state: tokio::sync::Mutex::new(None),
                    last_used: Mutex::new(Utc::now()),
                    in_use: AtomicUsize::new(0),
                })
            });
        slot.in_use.fetch_add(1, Ordering::SeqCst);
        *slot.last_used.lock() = Utc::now();
        Lease(Arc::clone(slot))
    }

    fn build_formats(&self, composite: &TemplateComposite) -> Formats {
        composite
            .template
            .formats
            .iter()
            .map(|descriptor| {
                let format = Format::from_descriptor(descriptor, &self.externals).map(Arc::new);
                if let Err(err) = &format {
                    warn!(template_id = %composite.template.id, format = %descriptor.name, error = %err, "Invalid format");
                }
                (descriptor.uuid, format)
            })
            .collect()
    }

    async fn sync(
        &self,
        tenant_uuid: Uuid,
        dir: &Path,
        previous: Option<&CachedTemplate>,
        composite: &TemplateComposite,
    ) -> Result<(HashMap<Uuid, String>, SyncReport), RegistryError> {
        let mut report = SyncReport::default();

        for name in entry_names(composite) {
            check_file_name(name)?;
        }

        match previous {
            None => {
                if tokio::fs::try_exists(dir).await.unwrap_or(false) {
                    tokio::fs::remove_dir_all(dir).await.map_err(io_error(dir))?;
                }
                tokio::fs::create_dir_all(dir).await.map_err(io_error(dir))?;
            }
            Some(cached) => {
                for name in stale_names(&cached.composite, composite) {
                    let path = dir.join(name);
                    match tokio::fs::remove_file(&path).await {
                        Ok(()) => {
                            report.deleted.push(name.to_string());
                            prune_empty_parents(dir, &path).await;
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(err) => return Err(io_error(&path)(err)),
                    }
                }
            }
        }

        let mut digests = HashMap::with_capacity(composite.files.len());
        for (uuid, file) in &composite.files {
            let digest = sha256_hex(file.content.as_bytes());
            let path = dir.join(&file.file_name);
            let unchanged = previous.is_some_and(|cached| {
                cached.digests.get(uuid) == Some(&digest)
                    && cached.composite.files.get(uuid).is_some_and(|old| old.file_name == file.file_name)
            });
            if !unchanged || !exists(&path).await {
                write_file(&path, file.content.as_bytes()).await?;
                report.written.push(file.file_name.clone());
            }
            digests.insert(*uuid, digest);
        }

        for (uuid, asset) in &composite.assets {
            let path = dir.join(&asset.file_name);
            let unchanged = previous.is_some_and(|cached| {
                cached
                    .composite
                    .assets
                    .get(uuid)
                    .is_some_and(|old| old.file_name == asset.file_name && old.updated_at == asset.updated_at)
            });
            if unchanged && exists(&path).await {
                continue;
            }
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
            }
            let key = object_key(
                self.settings.multi_tenant,
                tenant_uuid,
                &format!("templates/{}/{uuid}", composite.template.id),
            );
            if !self.objects.get_object_to_file(&self.settings.bucket, &key, &path).await? {
                return Err(RegistryError::AssetMissing(asset.file_name.clone()));
            }
            report.written.push(asset.file_name.clone());
        }

        Ok((digests, report))
    }
}

fn entry_names(composite: &TemplateComposite) -> impl Iterator<Item = &str> {
    composite
        .files
        .values()
        .map(|file| file.file_name.as_str())
        .chain(composite.assets.values().map(|asset| asset.file_name.as_str()))
}

/// Local names of entries whose UUID is gone or that were renamed.
fn stale_names<'a>(previous: &'a TemplateComposite, current: &TemplateComposite) -> Vec<&'a str> {
    let files = previous.files.iter().filter_map(|(uuid, old)| {
        let kept = current.files.get(uuid).is_some_and(|new| new.file_name == old.file_name);
        (!kept).then_some(old.file_name.as_str())
    });
    let assets = previous.assets.iter().filter_map(|(uuid, old)| {
        let kept = current.assets.get(uuid).is_some_and(|new| new.file_name == old.file_name);
        (!kept).then_some(old.file_name.as_str())
    });
    files.chain(assets).collect()
}

/// Remove directories left empty by a deletion, up to (not including) `root`.
async fn prune_empty_parents(root: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(parent) = current {
        if parent == root || !parent.starts_with(root) {
            break;
        }
        if tokio::fs::remove_dir(parent).await.is_err() {
            break;
        }
        debug!(path = %parent.display(), "Removed empty template directory");
        current = parent.parent();
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn write_file(path: &Path, content: &[u8]) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_error(parent))?;
    }
    tokio::fs::write(path, content).await.map_err(io_error(path))
}

fn check_file_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && Path::new(name)
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidFileName(name.to_string()))
    }
}

/// Directory name of a template identifier such as `org:template:1.0.0`.
fn dir_name(template_id: &str) -> String {
    let name: String = template_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    if name.chars().all(|c| c == '.') {
        name.replace('.', "_")
    } else {
        name
    }
}
