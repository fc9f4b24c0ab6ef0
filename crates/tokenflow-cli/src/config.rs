//! CLI configuration loaded from `tokenflow.toml`.
//!
//! Every section is optional; missing keys fall back to defaults and
//! command-line flags override whatever the file sets.
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [stream]
//! timeout_ms = 30000
//! chunk_size = 8192
//!
//! [http.headers]
//! authorization = "Bearer sk-..."
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokenflow_stream::{CancellationToken, RunConfig};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "tokenflow.toml";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Top-level CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub log: LogConfig,
    pub stream: StreamConfig,
    pub http: HttpConfig,
}

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// `[stream]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Inactivity timeout per pull in milliseconds; 0 or absent disables it.
    pub timeout_ms: Option<u64>,
    /// Read size for file and stdin input.
    pub chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            chunk_size: 8 * 1024,
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Extra request headers sent with `--url` input.
    pub headers: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl CliConfig {
    /// Load the config from `path`, or from [`DEFAULT_CONFIG_FILE`] if it
    /// exists.  An explicit path that cannot be read is an error; a missing
    /// default file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        if config.stream.chunk_size == 0 {
            config.stream.chunk_size = StreamConfig::default().chunk_size;
        }
        Ok(config)
    }

    /// Build the run config for one pipeline, with `timeout_ms` taking
    /// precedence over the file's value.
    pub fn run_config(&self, timeout_ms: Option<u64>, cancel: CancellationToken) -> RunConfig {
        let mut run = RunConfig::new().with_cancel(cancel);
        if let Some(ms) = timeout_ms.or(self.stream.timeout_ms) {
            run = run.with_stream_timeout(Duration::from_millis(ms));
        }
        run
    }
}
