//! Tracing configuration resolved from the environment.
//!
//! Hooks run with whatever environment Claude Code hands them, so there is no config
//! file: every setting comes from a `LANGFUSE_*` variable with a default.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::state::DEFAULT_LOCK_TIMEOUT;
use crate::storage::StorageConfig;

pub const DEFAULT_HOST: &str = "https://cloud.langfuse.com";
pub const DEFAULT_ENVIRONMENT: &str = "development";
pub const DEFAULT_RELEASE: &str = "claude-code-hooks-v1";
pub const DEFAULT_STALE_HOURS: u64 = 24;

#[derive(Clone)]
pub struct TraceConfig {
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub host: String,
    pub enabled: bool,
    pub environment: String,
    pub release: String,
    pub debug: bool,
    /// Overrides the `~/.claude/langfuse` base directory.
    pub state_dir: Option<PathBuf>,
    pub stale_hours: u64,
    pub lock_timeout: Duration,
    /// Sent as the trace user id.
    pub user_id: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            secret_key: None,
            host: DEFAULT_HOST.to_string(),
            enabled: true,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            release: DEFAULT_RELEASE.to_string(),
            debug: false,
            state_dir: None,
            stale_hours: DEFAULT_STALE_HOURS,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            user_id: "unknown".to_string(),
        }
    }
}

impl TraceConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves every setting through `lookup`. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Self {
            public_key: get("LANGFUSE_PUBLIC_KEY"),
            secret_key: get("LANGFUSE_SECRET_KEY"),
            host: get("LANGFUSE_HOST")
                .map(|h| h.trim_end_matches('/').to_string())
                .unwrap_or(defaults.host),
            enabled: get("LANGFUSE_ENABLED")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.enabled),
            environment: get("LANGFUSE_ENVIRONMENT").unwrap_or(defaults.environment),
            release: get("LANGFUSE_RELEASE").unwrap_or(defaults.release),
            debug: get("LANGFUSE_DEBUG").is_some_and(|v| parse_bool(&v)),
            state_dir: get("LANGFUSE_STATE_DIR").map(PathBuf::from),
            stale_hours: get("LANGFUSE_STALE_HOURS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.stale_hours),
            lock_timeout: get("LANGFUSE_LOCK_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            user_id: get("ENGINEER_NAME")
                .or_else(|| get("USER"))
                .unwrap_or(defaults.user_id),
        }
    }

    /// Enabled, with both keys present.
    pub fn is_available(&self) -> bool {
        self.enabled && self.public_key.is_some() && self.secret_key.is_some()
    }

    pub fn storage(&self) -> Result<StorageConfig> {
        match &self.state_dir {
            Some(dir) => Ok(StorageConfig::with_root(dir.clone())),
            None => StorageConfig::from_home(),
        }
    }
}

impl fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceConfig")
            .field("public_key", &self.public_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("enabled", &self.enabled)
            .field("environment", &self.environment)
            .field("release", &self.release)
            .field("debug", &self.debug)
            .field("state_dir", &self.state_dir)
            .field("stale_hours", &self.stale_hours)
            .field("lock_timeout", &self.lock_timeout)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Only "true" (any case) is true; every other value is false.
fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> TraceConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TraceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let config = config_from(&[]);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.environment, "development");
        assert_eq!(config.release, "claude-code-hooks-v1");
        assert_eq!(config.stale_hours, 24);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.user_id, "unknown");
        assert!(config.enabled);
        assert!(!config.is_available());
    }

    #[test]
    fn test_available_needs_both_keys() {
        assert!(!config_from(&[("LANGFUSE_PUBLIC_KEY", "pk")]).is_available());
        let both = config_from(&[("LANGFUSE_PUBLIC_KEY", "pk"), ("LANGFUSE_SECRET_KEY", "sk")]);
        assert!(both.is_available());
        let blank = config_from(&[("LANGFUSE_PUBLIC_KEY", "pk"), ("LANGFUSE_SECRET_KEY", "  ")]);
        assert!(!blank.is_available());
    }

    #[test]
    fn test_explicit_disable_wins() {
        let config = config_from(&[
            ("LANGFUSE_PUBLIC_KEY", "pk"),
            ("LANGFUSE_SECRET_KEY", "sk"),
            ("LANGFUSE_ENABLED", "False"),
        ]);
        assert!(!config.is_available());
    }

    #[test]
    fn test_only_true_enables() {
        for value in ["true", "TRUE", "True"] {
            assert!(config_from(&[("LANGFUSE_ENABLED", value)]).enabled, "{}", value);
        }
        for value in ["1", "yes", "on", "false"] {
            assert!(!config_from(&[("LANGFUSE_ENABLED", value)]).enabled, "{}", value);
        }
        assert!(!config_from(&[("LANGFUSE_DEBUG", "1")]).debug);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("LANGFUSE_HOST", "http://localhost:3000/"),
            ("LANGFUSE_STATE_DIR", "/tmp/lf"),
            ("LANGFUSE_STALE_HOURS", "6"),
            ("LANGFUSE_LOCK_TIMEOUT_MS", "250"),
            ("LANGFUSE_DEBUG", "true"),
            ("USER", "dev"),
        ]);
        assert_eq!(config.host, "http://localhost:3000");
        assert_eq!(config.storage().unwrap().root(), std::path::Path::new("/tmp/lf"));
        assert_eq!(config.stale_hours, 6);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert!(config.debug);
        assert_eq!(config.user_id, "dev");
    }

    #[test]
    fn test_engineer_name_preferred_over_user() {
        let config = config_from(&[("ENGINEER_NAME", "ada"), ("USER", "dev")]);
        assert_eq!(config.user_id, "ada");
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let config = config_from(&[("LANGFUSE_STALE_HOURS", "soon")]);
        assert_eq!(config.stale_hours, DEFAULT_STALE_HOURS);
    }

    #[test]
    fn test_debug_output_redacts_secret() {
        let config = config_from(&[
            ("LANGFUSE_PUBLIC_KEY", "pk-lf-1"),
            ("LANGFUSE_SECRET_KEY", "sk-lf-secret"),
        ]);
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("pk-lf-1"));
        assert!(!rendered.contains("sk-lf-secret"));
    }
}
