//! Run configuration threaded through pipeline stages.
//!
//! [`RunConfig`] carries caller-supplied options from one stage of a pipeline
//! to the next.  The serializable part can be loaded from TOML; the
//! cancellation token is attached at runtime.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;

/// Options propagated through a chain of setup coordinators.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Inactivity window, in milliseconds, after which a pull fails with
    /// [`StreamError::Timeout`](crate::StreamError::Timeout).  `None` or `0`
    /// disables the timeout.
    pub stream_timeout_ms: Option<u64>,

    /// Free-form metadata handed to every stage unchanged.
    pub metadata: BTreeMap<String, serde_json::Value>,

    /// Token raced against every pull of a stage built from this config.
    #[serde(skip)]
    pub cancel: Option<CancellationToken>,
}

impl RunConfig {
    /// Create a configuration with no timeout, no metadata and no token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stream inactivity timeout.
    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Insert a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The effective inactivity timeout, if one is enabled.
    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_timeout() {
        let cfg = RunConfig::default();
        assert!(cfg.stream_timeout().is_none());
        assert!(cfg.metadata.is_empty());
        assert!(cfg.cancel.is_none());
    }

    #[test]
    fn zero_timeout_is_disabled() {
        let cfg = RunConfig {
            stream_timeout_ms: Some(0),
            ..RunConfig::default()
        };
        assert!(cfg.stream_timeout().is_none());
    }

    #[test]
    fn builder_chaining() {
        let token = CancellationToken::new();
        let cfg = RunConfig::new()
            .with_stream_timeout(Duration::from_millis(250))
            .with_cancel(token.clone())
            .with_metadata("run_name", serde_json::json!("summarize"));
        assert_eq!(cfg.stream_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.metadata["run_name"], "summarize");
        token.cancel();
        assert!(cfg.cancel.as_ref().is_some_and(CancellationToken::is_cancelled));
    }

    #[test]
    fn loads_from_toml() {
        let cfg: RunConfig = toml::from_str(
            r#"
            stream_timeout_ms = 1500

            [metadata]
            tenant = "acme"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stream_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(cfg.metadata["tenant"], "acme");
        assert!(cfg.cancel.is_none());
    }
}
