//! Environment-backed runtime configuration for the chat client.

use std::{env, error::Error, fmt, path::PathBuf, time::Duration};

const DEFAULT_IDENTITY_PATH: &str = "./.chat-client-store/current-user.json";
const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 500;
const DEFAULT_MESSAGE_LOG_MAX_ITEMS: usize = 1_000;
const DEFAULT_OPPONENT_CHECK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_EVENT_BUFFER: usize = 512;

/// Runtime configuration used by the chat bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// File backing the persisted identity.
    pub identity_path: PathBuf,
    /// Optional name used for the cold-start create request.
    pub user_name: Option<String>,
    /// Inactivity window before the typing indicator clears.
    pub typing_debounce_ms: u64,
    /// Cap on retained messages for the active room.
    pub message_log_max_items: usize,
    /// Upper bound on waiting for the opponent-room check outcome.
    pub opponent_check_timeout_ms: u64,
    /// Outbound channel capacity.
    pub command_buffer: usize,
    /// Inbound broadcast capacity.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            identity_path: PathBuf::from(DEFAULT_IDENTITY_PATH),
            user_name: None,
            typing_debounce_ms: DEFAULT_TYPING_DEBOUNCE_MS,
            message_log_max_items: DEFAULT_MESSAGE_LOG_MAX_ITEMS,
            opponent_check_timeout_ms: DEFAULT_OPPONENT_CHECK_TIMEOUT_MS,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ChatConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let identity_path = optional_trimmed_env("CHAT_IDENTITY_PATH", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IDENTITY_PATH));
        let user_name = optional_trimmed_env("CHAT_USER_NAME", &mut lookup);

        let typing_debounce_ms = parse_optional_u64_with_default(
            "CHAT_TYPING_DEBOUNCE_MS",
            DEFAULT_TYPING_DEBOUNCE_MS,
            &mut lookup,
        )?;
        let message_log_max_items = parse_optional_usize(
            "CHAT_MESSAGE_LOG_MAX_ITEMS",
            DEFAULT_MESSAGE_LOG_MAX_ITEMS,
            &mut lookup,
        )?;
        let opponent_check_timeout_ms = parse_optional_u64_with_default(
            "CHAT_OPPONENT_CHECK_TIMEOUT_MS",
            DEFAULT_OPPONENT_CHECK_TIMEOUT_MS,
            &mut lookup,
        )?;
        let command_buffer =
            parse_optional_usize("CHAT_COMMAND_BUFFER", DEFAULT_COMMAND_BUFFER, &mut lookup)?;
        let event_buffer =
            parse_optional_usize("CHAT_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        require_positive("CHAT_TYPING_DEBOUNCE_MS", typing_debounce_ms)?;
        require_positive("CHAT_MESSAGE_LOG_MAX_ITEMS", message_log_max_items as u64)?;
        require_positive("CHAT_OPPONENT_CHECK_TIMEOUT_MS", opponent_check_timeout_ms)?;
        require_positive("CHAT_COMMAND_BUFFER", command_buffer as u64)?;
        require_positive("CHAT_EVENT_BUFFER", event_buffer as u64)?;

        Ok(Self {
            identity_path,
            user_name,
            typing_debounce_ms,
            message_log_max_items,
            opponent_check_timeout_ms,
            command_buffer,
            event_buffer,
        })
    }

    pub fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms)
    }

    pub fn opponent_check_timeout(&self) -> Duration {
        Duration::from_millis(self.opponent_check_timeout_ms)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(parse_optional_u64(key, lookup)?.unwrap_or(default))
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn require_positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: "0".to_owned(),
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<ChatConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        ChatConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config_from_pairs(&[]).expect("empty config should parse");
        assert_eq!(cfg, ChatConfig::default());
        assert_eq!(cfg.typing_debounce(), Duration::from_millis(500));
        assert_eq!(cfg.opponent_check_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_overrides() {
        let cfg = config_from_pairs(&[
            ("CHAT_IDENTITY_PATH", " /tmp/chat/user.json "),
            ("CHAT_USER_NAME", "Alice"),
            ("CHAT_TYPING_DEBOUNCE_MS", "250"),
            ("CHAT_MESSAGE_LOG_MAX_ITEMS", "50"),
            ("CHAT_OPPONENT_CHECK_TIMEOUT_MS", "2000"),
            ("CHAT_COMMAND_BUFFER", "8"),
            ("CHAT_EVENT_BUFFER", "16"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.identity_path, PathBuf::from("/tmp/chat/user.json"));
        assert_eq!(cfg.user_name.as_deref(), Some("Alice"));
        assert_eq!(cfg.typing_debounce_ms, 250);
        assert_eq!(cfg.message_log_max_items, 50);
        assert_eq!(cfg.opponent_check_timeout_ms, 2_000);
        assert_eq!(cfg.command_buffer, 8);
        assert_eq!(cfg.event_buffer, 16);
    }

    #[test]
    fn blank_user_name_is_treated_as_unset() {
        let cfg = config_from_pairs(&[("CHAT_USER_NAME", "   ")]).expect("config should parse");
        assert_eq!(cfg.user_name, None);
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("CHAT_TYPING_DEBOUNCE_MS", "soon")])
            .expect_err("invalid debounce should fail");

        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_TYPING_DEBOUNCE_MS",
                ..
            }
        ));
    }

    #[test]
    fn rejects_zero_limits() {
        let err = config_from_pairs(&[("CHAT_MESSAGE_LOG_MAX_ITEMS", "0")])
            .expect_err("zero cap should fail");
        assert_eq!(
            err.to_string(),
            "invalid CHAT_MESSAGE_LOG_MAX_ITEMS='0': must be at least 1"
        );
    }
}
