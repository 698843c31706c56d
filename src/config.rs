// expense-report-service/src/config.rs

use config::builder::DefaultState;
use config::{Config as ConfigLoader, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub report: ReportConfig,
    pub converter: ConverterConfig,
    pub cleanup: CleanupConfig,
    pub inbox: InboxConfig,
    pub mail: MailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub asset_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Title printed on the form and prefix of generated file names.
    pub label: String,
    pub disclaimer: String,
    pub currency: String,
    pub footer_lines: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverterConfig {
    pub heic_command: String,
    /// `{input}` and `{output}` are replaced with the file paths.
    pub heic_args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub retention_secs: u64,
    pub interval_secs: u64,
}

impl CleanupConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboxConfig {
    pub dir: PathBuf,
    pub responses_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub max_concurrent_submissions: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub recipient: String,
    pub copy: Option<String>,
    pub subject: String,
    pub sender_name: String,
    pub outbox_dir: PathBuf,
    pub body_template: String,
}

const DEFAULT_BODY_TEMPLATE: &str =
    "Hej,\n\nHär kommer bifogade kvitton för {{name}}.\n\nTotalt belopp: {{total}} {{currency}}\n\nMvh,\n{{sender}}";

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::defaults(Path::new("."))?
            // Load from config file if it exists
            .add_source(File::with_name("config").required(false))
            // Override with environment variables (e.g., SERVICE__STORAGE__OUTPUT_DIR)
            .add_source(Environment::with_prefix("SERVICE").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Defaults only, with every directory placed under `root`.
    #[cfg(test)]
    pub fn with_root(root: &Path) -> Result<Self, ConfigError> {
        Self::defaults(root)?.build()?.try_deserialize()
    }

    fn defaults(root: &Path) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let dir = |name: &str| root.join(name).to_string_lossy().into_owned();

        ConfigLoader::builder()
            .set_default("service.name", "expense-report-service")?
            .set_default("service.log_level", "info")?
            .set_default("storage.upload_dir", dir("uploads"))?
            .set_default("storage.output_dir", dir("output"))?
            .set_default("storage.temp_dir", dir("tmp"))?
            .set_default("storage.asset_dir", dir("assets"))?
            .set_default("report.label", "Utläggsblankett")?
            .set_default("report.disclaimer", "Detta dokument kommer att godkännas digitalt.")?
            .set_default("report.currency", "SEK")?
            .set_default(
                "report.footer_lines",
                vec!["Ekonomi", "ekonomi@example.org"],
            )?
            .set_default("converter.heic_command", "heif-convert")?
            .set_default("converter.heic_args", vec!["{input}", "{output}"])?
            .set_default("cleanup.retention_secs", 3600)?
            .set_default("cleanup.interval_secs", 600)?
            .set_default("inbox.dir", dir("inbox"))?
            .set_default("inbox.responses_dir", dir("responses"))?
            .set_default("inbox.poll_interval_ms", 1000)?
            .set_default("inbox.max_concurrent_submissions", 4)?
            .set_default("mail.recipient", "ekonomi@example.org")?
            .set_default("mail.subject", "Kvittounderlag")?
            .set_default("mail.sender_name", "Utläggsportalen")?
            .set_default("mail.outbox_dir", dir("outbox"))?
            .set_default("mail.body_template", DEFAULT_BODY_TEMPLATE)
    }
}
