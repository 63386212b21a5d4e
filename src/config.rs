//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/phabsync.sqlite"
//!
//! [phabricator]
//! url = "https://phabricator.example.com/"
//! token_env = "PHABRICATOR_TOKEN"
//! verify_ssl = true
//! timeout_secs = 30
//!
//! [sync]
//! source_id = "phabricator"
//! batch_size = 512
//! sink = "sqlite"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::dispatch::FEED_BATCH_SIZE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub phabricator: PhabricatorConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PhabricatorConfig {
    /// Server root, e.g. `https://phabricator.example.com/`.
    pub url: String,
    /// Inline API token. Mutually exclusive with `token_env`.
    #[serde(default)]
    pub token: Option<String>,
    /// Name of the environment variable holding the API token.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_verify_ssl() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

impl PhabricatorConfig {
    /// Resolve the API token from the inline value or the named variable.
    pub fn resolve_token(&self) -> Result<String> {
        let token = match (&self.token, &self.token_env) {
            (Some(token), None) => token.clone(),
            (None, Some(var)) => std::env::var(var)
                .with_context(|| format!("{} environment variable not set", var))?,
            _ => bail!("exactly one of phabricator.token or phabricator.token_env must be set"),
        };
        if token.trim().is_empty() {
            bail!("Phabricator API token is empty");
        }
        Ok(token)
    }
}

/// Where a pass delivers its documents.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Upsert into the `documents` table of the configured database.
    #[default]
    Sqlite,
    /// One JSON object per line on stdout.
    Jsonl,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Owning-source identifier stamped on every exported document and
    /// used as the checkpoint key.
    #[serde(default = "default_source_id")]
    pub source_id: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub sink: SinkKind,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_id: default_source_id(),
            batch_size: default_batch_size(),
            sink: SinkKind::default(),
        }
    }
}

fn default_source_id() -> String {
    "phabricator".to_string()
}
fn default_batch_size() -> usize {
    FEED_BATCH_SIZE
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate phabricator
    let url = reqwest::Url::parse(&config.phabricator.url)
        .with_context(|| format!("phabricator.url is not a URL: {}", config.phabricator.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("phabricator.url must use http or https, got '{}'", url.scheme());
    }
    match (&config.phabricator.token, &config.phabricator.token_env) {
        (Some(token), None) if token.trim().is_empty() => {
            bail!("phabricator.token must not be empty")
        }
        (None, Some(var)) if var.trim().is_empty() => {
            bail!("phabricator.token_env must name a variable")
        }
        (Some(_), None) | (None, Some(_)) => {}
        _ => bail!("exactly one of phabricator.token or phabricator.token_env must be set"),
    }
    if config.phabricator.timeout_secs == 0 {
        bail!("phabricator.timeout_secs must be > 0");
    }

    // Validate sync
    if config.sync.batch_size == 0 {
        bail!("sync.batch_size must be > 0");
    }
    if config.sync.source_id.trim().is_empty() {
        bail!("sync.source_id must not be empty");
    }

    Ok(config)
}
