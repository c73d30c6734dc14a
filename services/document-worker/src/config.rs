//! Configuration for the document worker.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentWorkerConfig {
    /// Database connection.
    pub database: DatabaseConfig,
    /// Command queue behavior.
    #[serde(default)]
    pub queue: QueueSettings,
    /// Object storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Local template cache.
    #[serde(default)]
    pub templates: TemplatesConfig,
    /// Document policies.
    #[serde(default)]
    pub documents: DocumentsConfig,
    /// External converters.
    #[serde(default)]
    pub externals: ExternalsConfig,
    /// Template environment.
    #[serde(default)]
    pub templating: TemplatingConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,
    /// Pool size for document and template queries. Claim transactions and
    /// the notification listener use connections of their own.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Connections the worker opens, per use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionBudget {
    /// Pool holding the open claim transaction of the current command.
    pub claims: u32,
    /// Pool serving document and template queries while a claim is open.
    pub queries: u32,
    /// Dedicated `LISTEN` connection.
    pub listener: u32,
}

impl ConnectionBudget {
    /// Connections opened in total.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.claims + self.queries + self.listener
    }
}

impl DatabaseConfig {
    /// The queue loop holds at most one claim at a time.
    pub const CLAIM_CONNECTIONS: u32 = 1;

    /// How connections are split between claims, queries and the listener.
    #[must_use]
    pub fn budget(&self) -> ConnectionBudget {
        ConnectionBudget {
            claims: Self::CLAIM_CONNECTIONS,
            queries: self.max_connections.max(1),
            listener: 1,
        }
    }
}

/// Command queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Component whose commands this worker claims.
    #[serde(default = "default_component")]
    pub component: String,
    /// Longest wait between polls.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Base interval of the retry backoff.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: i64,
    /// Reconnect attempts before giving up.
    #[serde(default = "default_connection_retries")]
    pub connection_retries: u32,
    /// First reconnect delay in milliseconds.
    #[serde(default = "default_connection_retry_delay")]
    pub connection_retry_delay_ms: u64,
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object store.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Bucket documents are stored in.
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Prefix object keys with the tenant UUID.
    #[serde(default)]
    pub multi_tenant: bool,
}

/// Template cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    /// Directory holding one subdirectory per cached template.
    #[serde(default = "default_templates_dir")]
    pub dir: PathBuf,
    /// Days an unused template stays cached.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// How stored document files are named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingStrategy {
    /// `<uuid>.<ext>`
    Uuid,
    /// Document title stripped of unsafe characters.
    #[default]
    Sanitize,
    /// Lowercase ASCII words joined by dashes.
    Slugify,
}

/// Document policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentsConfig {
    /// File naming strategy.
    #[serde(default)]
    pub naming: NamingStrategy,
    /// Soft deadline for build and store, in seconds.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    /// Largest allowed document in bytes.
    #[serde(default)]
    pub max_size: Option<u64>,
    /// Text stamped on watermarked PDFs.
    #[serde(default = "default_watermark_text")]
    pub pdf_watermark_text: String,
}

/// External converter invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalCommand {
    /// Executable followed by leading arguments.
    pub command: Vec<String>,
    /// Fixed flags appended before per-step arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Hard wall-clock limit in seconds.
    #[serde(default = "default_external_timeout")]
    pub timeout_secs: u64,
}

impl ExternalCommand {
    /// Converter started as `command`.
    #[must_use]
    pub fn new(command: &[&str]) -> Self {
        Self {
            command: command.iter().map(ToString::to_string).collect(),
            args: Vec::new(),
            timeout_secs: default_external_timeout(),
        }
    }

    /// The hard timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// External converters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalsConfig {
    /// HTML to PDF converter.
    #[serde(default = "default_wkhtmltopdf")]
    pub wkhtmltopdf: ExternalCommand,
    /// Universal document converter.
    #[serde(default = "default_pandoc")]
    pub pandoc: ExternalCommand,
}

/// Outbound HTTP available to templates.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestsConfig {
    /// Expose `requests` to templates.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum requests per render.
    #[serde(default = "default_requests_limit")]
    pub limit: u32,
    /// Timeout per request in seconds.
    #[serde(default = "default_requests_timeout")]
    pub timeout_secs: u64,
    /// Sustained requests per second across renders.
    #[serde(default = "default_requests_rate")]
    pub per_second: u32,
}

/// Template environment configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatingConfig {
    /// Secrets exposed as `secrets`.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Variables exposed as `vars`.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Outbound HTTP.
    #[serde(default)]
    pub requests: RequestsConfig,
}

/// Log output configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            component: default_component(),
            poll_timeout_secs: default_poll_timeout(),
            backoff_base_secs: default_backoff_base(),
            connection_retries: default_connection_retries(),
            connection_retry_delay_ms: default_connection_retry_delay(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
            multi_tenant: false,
        }
    }
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: default_templates_dir(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            naming: NamingStrategy::default(),
            job_timeout_secs: None,
            max_size: None,
            pdf_watermark_text: default_watermark_text(),
        }
    }
}

impl Default for ExternalsConfig {
    fn default() -> Self {
        Self {
            wkhtmltopdf: default_wkhtmltopdf(),
            pandoc: default_pandoc(),
        }
    }
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: default_requests_limit(),
            timeout_secs: default_requests_timeout(),
            per_second: default_requests_rate(),
        }
    }
}

const fn default_max_connections() -> u32 {
    1
}

const fn default_connect_timeout() -> u64 {
    30
}

fn default_component() -> String {
    "doc_worker".to_string()
}

const fn default_poll_timeout() -> u64 {
    300
}

const fn default_backoff_base() -> i64 {
    60
}

const fn default_connection_retries() -> u32 {
    5
}

const fn default_connection_retry_delay() -> u64 {
    500
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/objects")
}

fn default_bucket() -> String {
    "engine-public".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("/tmp/document-worker/templates")
}

const fn default_retention_days() -> u32 {
    7
}

fn default_watermark_text() -> String {
    "DEMO".to_string()
}

const fn default_external_timeout() -> u64 {
    180
}

fn default_wkhtmltopdf() -> ExternalCommand {
    let mut command = ExternalCommand::new(&["wkhtmltopdf"]);
    command.args = vec!["--quiet".to_string(), "--encoding".to_string(), "utf-8".to_string()];
    command
}

fn default_pandoc() -> ExternalCommand {
    ExternalCommand::new(&["pandoc"])
}

const fn default_requests_limit() -> u32 {
    100
}

const fn default_requests_timeout() -> u64 {
    5
}

const fn default_requests_rate() -> u32 {
    10
}

impl DocumentWorkerConfig {
    /// Load configuration from files and environment.
    ///
    /// `DOCUMENT_WORKER_CONFIG` may name one extra TOML file merged before
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if configuration cannot be loaded or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let mut figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file("config/local.toml"));
        if let Ok(extra) = std::env::var("DOCUMENT_WORKER_CONFIG") {
            figment = figment.merge(Toml::file(extra));
        }
        let config: Self = figment
            .merge(Env::prefixed("DOCUMENT_WORKER_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// The queue loop settings.
    #[must_use]
    pub fn queue_config(&self) -> worker_queue::QueueConfig {
        worker_queue::QueueConfig::new(self.queue.component.clone())
            .with_poll_timeout(Duration::from_secs(self.queue.poll_timeout_secs))
            .with_connection_retries(
                self.queue.connection_retries,
                Duration::from_millis(self.queue.connection_retry_delay_ms),
            )
    }

    /// The retry backoff.
    #[must_use]
    pub const fn backoff(&self) -> worker_queue::Backoff {
        worker_queue::Backoff::from_secs(self.queue.backoff_base_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queue_settings() {
        let queue = QueueSettings::default();
        assert_eq!(queue.component, "doc_worker");
        assert_eq!(queue.poll_timeout_secs, 300);
        assert_eq!(queue.backoff_base_secs, 60);
    }

    #[test]
    fn test_default_document_policies() {
        let documents = DocumentsConfig::default();
        assert_eq!(documents.naming, NamingStrategy::Sanitize);
        assert!(documents.max_size.is_none());
        assert_eq!(documents.pdf_watermark_text, "DEMO");
    }

    #[test]
    fn test_claims_never_share_the_query_pool() {
        let mut database = DatabaseConfig {
            url: "postgres://localhost/engine".into(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        };
        let budget = database.budget();
        assert_eq!(budget.claims, 1);
        assert_eq!(budget.queries, 1);
        assert_eq!(budget.listener, 1);

        database.max_connections = 0;
        assert_eq!(database.budget().queries, 1);
        database.max_connections = 4;
        assert_eq!(database.budget().total(), 6);
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config: DocumentWorkerConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [database]
                url = "postgres://localhost/engine"

                [documents]
                naming = "slugify"

                [externals.pandoc]
                command = ["docker", "run", "pandoc"]
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.database.budget().total(), 3);
        assert_eq!(config.documents.naming, NamingStrategy::Slugify);
        assert_eq!(config.externals.pandoc.command, ["docker", "run", "pandoc"]);
        assert_eq!(config.externals.pandoc.timeout(), Duration::from_secs(180));
        assert_eq!(config.externals.wkhtmltopdf.command, ["wkhtmltopdf"]);
        assert_eq!(config.templates.retention_days, 7);
        assert!(!config.templating.requests.enabled);
    }
}
