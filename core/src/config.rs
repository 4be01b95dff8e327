/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://responserift.dev";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the REST backend (without the `/api` suffix)
    pub base_url: String,

    /// Sender id stamped on locally created messages
    pub local_user_id: String,

    /// Age after which a conversation's cached messages are refetched on read
    #[serde(with = "duration_ms")]
    pub messages_stale_after: Duration,

    /// Age after which the conversation list is refetched on read
    #[serde(with = "duration_ms")]
    pub conversations_stale_after: Duration,

    /// Max concurrent per-conversation fetches when loading list previews
    pub preview_fetch_concurrency: usize,

    /// Per-request timeout enforced by the HTTP gateway
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,

    /// Put the previous latest-message entry back when a send is rolled back
    pub rollback_projection: bool,

    /// Capacity of the client event channel
    pub event_capacity: usize,

    /// Use the in-memory gateway instead of the network (CLI only)
    pub offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            local_user_id: "me".to_string(),
            messages_stale_after: Duration::from_secs(30),
            conversations_stale_after: Duration::from_secs(60),
            preview_fetch_concurrency: 4,
            request_timeout: Duration::from_secs(15),
            rollback_projection: true,
            event_capacity: 256,
            offline: false,
        }
    }
}

impl Config {
    /// Load a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChatError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| ChatError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Build config from command line arguments.
    ///
    /// `args[0]` is the program name. Flags may appear anywhere; everything
    /// else is returned in order as the command and its operands.
    pub fn from_args(args: &[String]) -> Result<(Self, Vec<String>)> {
        let mut config = Self::default();
        let mut rest = Vec::new();

        // A config file is the lowest layer above the defaults, so find it first
        if let Some(pos) = args.iter().position(|a| a == "--config") {
            let path = args.get(pos + 1).ok_or_else(|| {
                ChatError::Config("--config requires a path argument".to_string())
            })?;
            config = Self::from_file(Path::new(path))?;
        }

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    i += 2;
                }
                "--base-url" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--base-url requires a URL argument".to_string())
                    })?;
                    config.base_url = v.clone();
                    i += 2;
                }
                "--user" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--user requires an id argument".to_string())
                    })?;
                    config.local_user_id = v.clone();
                    i += 2;
                }
                "--concurrency" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--concurrency requires a number".to_string())
                    })?;
                    config.preview_fetch_concurrency = v.parse::<usize>().map_err(|_| {
                        ChatError::Config("--concurrency must be a positive number".to_string())
                    })?;
                    i += 2;
                }
                "--timeout-ms" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--timeout-ms requires a number".to_string())
                    })?;
                    let ms = v.parse::<u64>().map_err(|_| {
                        ChatError::Config("--timeout-ms must be a number".to_string())
                    })?;
                    config.request_timeout = Duration::from_millis(ms);
                    i += 2;
                }
                "--offline" => {
                    config.offline = true;
                    i += 1;
                }
                other => {
                    rest.push(other.to_string());
                    i += 1;
                }
            }
        }

        config.apply_env();
        config.validate()?;
        Ok((config, rest))
    }

    /// Env overrides (nice for scripts)
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("PARLEY_BASE_URL") {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        if let Ok(user) = std::env::var("PARLEY_USER") {
            if !user.trim().is_empty() {
                self.local_user_id = user;
            }
        }
        if let Some(n) = std::env::var("PARLEY_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.preview_fetch_concurrency = n;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ChatError::Config(format!("invalid base_url {:?}: {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "base_url must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.preview_fetch_concurrency == 0 {
            return Err(ChatError::Config(
                "preview_fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.local_user_id.trim().is_empty() {
            return Err(ChatError::Config("local_user_id must not be empty".to_string()));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.messages_stale_after, Duration::from_secs(30));
        assert_eq!(config.conversations_stale_after, Duration::from_secs(60));
        assert!(config.rollback_projection);
    }

    #[test]
    fn test_from_args_splits_flags_and_command() {
        let (config, rest) = Config::from_args(&args(&[
            "parley",
            "send",
            "--user",
            "alice",
            "7",
            "hi",
            "--concurrency",
            "2",
        ]))
        .unwrap();
        assert_eq!(config.local_user_id, "alice");
        assert_eq!(config.preview_fetch_concurrency, 2);
        assert_eq!(rest, args(&["send", "7", "hi"]));
    }

    #[test]
    fn test_from_args_rejects_missing_value() {
        let err = Config::from_args(&args(&["parley", "--base-url"])).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            preview_fetch_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = Config {
            base_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"base_url": "http://127.0.0.1:8080", "messages_stale_after": 5000}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.messages_stale_after, Duration::from_secs(5));
        assert_eq!(config.local_user_id, "me");
    }

    #[test]
    fn test_from_file_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ChatError::Config(_))
        ));
    }
}
