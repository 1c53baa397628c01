//! Messenger configuration loaded from environment variables.
//!
//! All settings have defaults so a messenger can start with zero
//! configuration.

use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which backend implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Shared in-process tree, lost on restart.
    #[default]
    Memory,
    /// JSON document on disk.
    File,
}

/// Unknown backend name.
#[derive(Debug, Error)]
#[error("unknown backend {0:?} (expected \"memory\" or \"file\")")]
pub struct UnknownBackend(String);

impl FromStr for BackendKind {
    type Err = UnknownBackend;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            _ => Err(UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::File => "file",
        })
    }
}

/// Backoff used when a live subscription loses its backend watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay to use after `delay` failed again.
    #[must_use]
    pub fn next_delay(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Messenger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Env: `MESSENGER_BACKEND`
    /// Default: `memory`
    pub backend: BackendKind,

    /// Directory for the file backend and the persisted session.
    /// Env: `MESSENGER_DATA_DIR`
    /// Default: `<platform data dir>/duet-messenger`
    pub data_dir: PathBuf,

    /// Env: `MESSENGER_RESUBSCRIBE_DELAY_MS`
    /// Default: `500`
    pub resubscribe_delay_ms: u64,

    /// Env: `MESSENGER_RESUBSCRIBE_MAX_DELAY_MS`
    /// Default: `10000`
    pub resubscribe_max_delay_ms: u64,

    /// How often a rename re-reads the record after a concurrent change.
    /// Env: `MESSENGER_RENAME_ATTEMPTS`
    /// Default: `3`
    pub rename_attempts: u32,

    /// Listen address of the demo web server.
    /// Env: `MESSENGER_HTTP_ADDR`
    /// Default: `127.0.0.1:3000`
    pub http_addr: SocketAddr,
}

impl Default for ChatConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            backend: BackendKind::default(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("duet-messenger"),
            resubscribe_delay_ms: duration_ms(retry.initial_delay),
            resubscribe_max_delay_ms: duration_ms(retry.max_delay),
            rename_attempts: 3,
            http_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ChatConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("MESSENGER_BACKEND") {
            match value.parse() {
                Ok(kind) => config.backend = kind,
                Err(e) => tracing::warn!(error = %e, "Invalid MESSENGER_BACKEND, using default"),
            }
        }

        if let Some(dir) = lookup("MESSENGER_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        parse_into(&lookup, "MESSENGER_RESUBSCRIBE_DELAY_MS", &mut config.resubscribe_delay_ms);
        parse_into(
            &lookup,
            "MESSENGER_RESUBSCRIBE_MAX_DELAY_MS",
            &mut config.resubscribe_max_delay_ms,
        );
        parse_into(&lookup, "MESSENGER_RENAME_ATTEMPTS", &mut config.rename_attempts);
        parse_into(&lookup, "MESSENGER_HTTP_ADDR", &mut config.http_addr);

        if config.rename_attempts == 0 {
            tracing::warn!("MESSENGER_RENAME_ATTEMPTS must be at least 1, using 1");
            config.rename_attempts = 1;
        }

        config
    }

    /// Location of the file backend's document.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database.json")
    }

    /// Location of the persisted session.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    /// Resubscribe backoff.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        let initial_delay = Duration::from_millis(self.resubscribe_delay_ms.max(1));
        RetryPolicy {
            initial_delay,
            max_delay: Duration::from_millis(self.resubscribe_max_delay_ms).max(initial_delay),
        }
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "Invalid setting, using default"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ChatConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ChatConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.rename_attempts, 3);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.data_dir.ends_with("duet-messenger"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("MESSENGER_BACKEND", "File"),
            ("MESSENGER_DATA_DIR", "/tmp/chat"),
            ("MESSENGER_RESUBSCRIBE_DELAY_MS", "20"),
            ("MESSENGER_RESUBSCRIBE_MAX_DELAY_MS", "80"),
            ("MESSENGER_HTTP_ADDR", "0.0.0.0:8080"),
        ]);
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/chat/database.json"));
        assert_eq!(config.session_path(), PathBuf::from("/tmp/chat/session.json"));
        assert_eq!(config.http_addr.port(), 8080);

        let retry = config.retry_policy();
        assert_eq!(retry.initial_delay, Duration::from_millis(20));
        assert_eq!(retry.next_delay(Duration::from_millis(20)), Duration::from_millis(40));
        assert_eq!(retry.next_delay(Duration::from_millis(60)), Duration::from_millis(80));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_from(&[
            ("MESSENGER_BACKEND", "postgres"),
            ("MESSENGER_RENAME_ATTEMPTS", "many"),
            ("MESSENGER_HTTP_ADDR", "nowhere"),
        ]);
        assert_eq!(config, config_from(&[]));
    }

    #[test]
    fn test_zero_rename_attempts_clamped() {
        let config = config_from(&[("MESSENGER_RENAME_ATTEMPTS", "0")]);
        assert_eq!(config.rename_attempts, 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ChatConfig = serde_json::from_str(r#"{"backend": "file"}"#).unwrap();
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.rename_attempts, 3);
    }
}
