use crate::constants::{cache, exec, pagination, pool, session, transfer};
use crate::errors::ToolError;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "SSH_MCP_";
const DEFAULT_CONFIG_FILE: &str = "ssh_mcp_config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownHostsPolicy {
    Ignore,
    Warn,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    None,
    Md5,
    Sha256,
    Both,
}

impl HashAlgorithm {
    pub fn wants_md5(self) -> bool {
        matches!(self, HashAlgorithm::Md5 | HashAlgorithm::Both)
    }

    pub fn wants_sha256(self) -> bool {
        matches!(self, HashAlgorithm::Sha256 | HashAlgorithm::Both)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub log_level: String,
    pub per_host_max_connections: usize,
    pub command_timeout_seconds: u64,
    pub idle_connection_ttl_seconds: u64,
    pub connection_retry_count: u32,
    pub connection_retry_delay_seconds: f64,
    pub known_hosts_policy: KnownHostsPolicy,
    pub hash_algorithm: HashAlgorithm,
    pub cache_maxsize: usize,
    pub static_ttl_seconds: u64,
    pub dynamic_ttl_seconds: u64,
    pub default_chunk_size: usize,
    pub session_idle_ttl_seconds: u64,
    pub session_read_timeout_seconds: u64,
    pub allowlist_only: bool,
    pub allowlist_patterns: Vec<String>,
    pub default_page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            per_host_max_connections: pool::PER_HOST_MAX_CONNECTIONS,
            command_timeout_seconds: exec::COMMAND_TIMEOUT_SECONDS,
            idle_connection_ttl_seconds: pool::IDLE_TTL_SECONDS,
            connection_retry_count: pool::RETRY_COUNT,
            connection_retry_delay_seconds: pool::RETRY_DELAY_SECONDS,
            known_hosts_policy: KnownHostsPolicy::Ignore,
            hash_algorithm: HashAlgorithm::Md5,
            cache_maxsize: cache::MAXSIZE,
            static_ttl_seconds: cache::STATIC_TTL_SECONDS,
            dynamic_ttl_seconds: cache::DYNAMIC_TTL_SECONDS,
            default_chunk_size: transfer::CHUNK_SIZE_BYTES,
            session_idle_ttl_seconds: session::IDLE_TTL_SECONDS,
            session_read_timeout_seconds: session::READ_TIMEOUT_SECONDS,
            allowlist_only: false,
            allowlist_patterns: default_allowlist(),
            default_page_size: pagination::DEFAULT_PAGE_SIZE,
        }
    }
}

fn default_allowlist() -> Vec<String> {
    [
        "ls", "cat", "grep", "head", "tail", "find", "stat", "wc", "df", "du", "free", "ps",
        "uname", "uptime", "whoami", "id", "hostname", "date", "echo", "pwd", "env", "which",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Settings {
    /// Loads the config file (if present), then applies `SSH_MCP_*`
    /// environment overrides. A malformed file or override is a startup
    /// error, a missing file is not.
    pub fn load() -> Result<Self, ToolError> {
        let path = std::env::var(format!("{}CONFIG_FILE", ENV_PREFIX))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ToolError> {
        let mut map = if path.is_file() {
            let raw = std::fs::read_to_string(path).map_err(|err| {
                ToolError::config(format!("Failed to read config file {}: {}", path.display(), err))
            })?;
            let value: Value = serde_json::from_str(&raw).map_err(|err| {
                ToolError::config(format!("Config file {} is not valid JSON: {}", path.display(), err))
            })?;
            match value {
                Value::Object(map) => map,
                _ => return Err(ToolError::config("Config file must be a JSON object")),
            }
        } else {
            serde_json::Map::new()
        };

        apply_env_overrides(&mut map, |key| std::env::var(key).ok());

        serde_json::from_value(Value::Object(map))
            .map_err(|err| ToolError::config(format!("Invalid configuration: {}", err)))
    }
}

pub(crate) fn settings_field_names() -> &'static [&'static str] {
    &[
        "log_level",
        "per_host_max_connections",
        "command_timeout_seconds",
        "idle_connection_ttl_seconds",
        "connection_retry_count",
        "connection_retry_delay_seconds",
        "known_hosts_policy",
        "hash_algorithm",
        "cache_maxsize",
        "static_ttl_seconds",
        "dynamic_ttl_seconds",
        "default_chunk_size",
        "session_idle_ttl_seconds",
        "session_read_timeout_seconds",
        "allowlist_only",
        "allowlist_patterns",
        "default_page_size",
    ]
}

fn apply_env_overrides<F>(map: &mut serde_json::Map<String, Value>, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for field in settings_field_names() {
        let env_key = format!("{}{}", ENV_PREFIX, field.to_uppercase());
        let Some(raw) = lookup(&env_key) else {
            continue;
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        map.insert(field.to_string(), coerce_env_value(trimmed));
    }
}

/// Environment values arrive as strings; numbers and booleans are coerced so
/// that `SSH_MCP_CACHE_MAXSIZE=64` deserializes into a usize field. String
/// fields that happen to look numeric are normalized back by serde.
fn coerce_env_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Value::Number(n.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(f) {
            return Value::Number(num);
        }
    }
    if raw.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
            return parsed;
        }
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.per_host_max_connections, 5);
        assert_eq!(settings.command_timeout_seconds, 30);
        assert_eq!(settings.idle_connection_ttl_seconds, 300);
        assert_eq!(settings.connection_retry_count, 3);
        assert_eq!(settings.cache_maxsize, 128);
        assert_eq!(settings.known_hosts_policy, KnownHostsPolicy::Ignore);
        assert_eq!(settings.hash_algorithm, HashAlgorithm::Md5);
        assert_eq!(settings.default_chunk_size, 32 * 1024);
    }

    #[test]
    fn env_overrides_coerce_types() {
        let mut map = serde_json::Map::new();
        apply_env_overrides(&mut map, |key| match key {
            "SSH_MCP_CACHE_MAXSIZE" => Some("64".to_string()),
            "SSH_MCP_ALLOWLIST_ONLY" => Some("true".to_string()),
            "SSH_MCP_CONNECTION_RETRY_DELAY_SECONDS" => Some("0.5".to_string()),
            "SSH_MCP_KNOWN_HOSTS_POLICY" => Some("reject".to_string()),
            _ => None,
        });
        let settings: Settings =
            serde_json::from_value(Value::Object(map)).expect("settings must parse");
        assert_eq!(settings.cache_maxsize, 64);
        assert!(settings.allowlist_only);
        assert!((settings.connection_retry_delay_seconds - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.known_hosts_policy, KnownHostsPolicy::Reject);
    }

    #[test]
    fn invalid_enum_value_is_config_error() {
        let raw = serde_json::json!({"known_hosts_policy": "trust-everyone"});
        let result: Result<Settings, _> = serde_json::from_value(raw);
        assert!(result.is_err());
    }

    #[test]
    fn file_overrides_then_env_wins() {
        let mut map = serde_json::Map::new();
        map.insert("cache_maxsize".to_string(), Value::Number(32.into()));
        apply_env_overrides(&mut map, |key| {
            (key == "SSH_MCP_CACHE_MAXSIZE").then(|| "16".to_string())
        });
        let settings: Settings =
            serde_json::from_value(Value::Object(map)).expect("settings must parse");
        assert_eq!(settings.cache_maxsize, 16);
    }
}
