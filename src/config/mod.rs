use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;

use crate::wire::codec::MAX_REQUEST_FRAME_BYTES;

pub const CONFIG_FLAG: &str = "--config";
pub const DISCOVERED_CONFIG_FILE: &str = "msgmux.toml";

pub const DEFAULT_CONFIG_TOML: &str = r#"
[logging]
level = "info"
human_friendly = false

[server]
host = "0.0.0.0"
port = 17087
read_buffer_size = 8192

[wire]
framing = "single_read"
max_frame_size_bytes = 65557

[workers]
pool_size = 10
task_queue_capacity = 0

[storage]
engine = "sled"
path = "~/.msgmux/data"

[storage.sled]
cache_capacity = 67108864
mode = "high_throughput"
"#;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub wire: WireConfig,
    pub workers: WorkersConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct WireConfig {
    pub framing: String,
    #[serde(default = "default_max_frame_size_bytes")]
    pub max_frame_size_bytes: usize,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct WorkersConfig {
    pub pool_size: usize,
    #[serde(default)]
    pub task_queue_capacity: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    pub engine: String,
    pub path: String,
    #[serde(default)]
    pub sled: SledConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SledConfig {
    pub cache_capacity: Option<u64>,
    pub mode: Option<String>,
}

fn default_read_buffer_size() -> usize {
    8192
}

fn default_max_frame_size_bytes() -> usize {
    crate::wire::frame::DEFAULT_MAX_FRAME_SIZE_BYTES
}

impl Default for AppConfig {
    fn default() -> Self {
        // The embedded document is covered by tests; a failure here is a build defect.
        Self::from_toml_str(DEFAULT_CONFIG_TOML, Vec::<String>::new())
            .expect("embedded default config must deserialize")
    }
}

impl AppConfig {
    /// Resolves the config source (`--config <path>`, then `./msgmux.toml`,
    /// then built-in defaults) and applies the remaining CLI overrides.
    pub fn load_with_discovery(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let mut args: Vec<String> = args.into_iter().collect();

        let explicit_path = if args.first().map(String::as_str) == Some(CONFIG_FLAG) {
            if args.len() < 2 {
                return Err(ConfigError::MissingValueForArg {
                    key: CONFIG_FLAG.trim_start_matches("--").to_owned(),
                });
            }
            let path = args.remove(1);
            args.remove(0);
            Some(PathBuf::from(path))
        } else {
            None
        };

        match explicit_path {
            Some(path) => Self::load_from_toml_with_args(path, args),
            None if Path::new(DISCOVERED_CONFIG_FILE).is_file() => {
                Self::load_from_toml_with_args(DISCOVERED_CONFIG_FILE, args)
            }
            None => Self::from_toml_str(DEFAULT_CONFIG_TOML, args),
        }
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_string_lossy().to_string(),
            source,
        })?;

        Self::parse_with_overrides(&toml_content, &path.as_ref().to_string_lossy(), args)
    }

    pub fn from_toml_str(
        toml_content: &str,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        Self::parse_with_overrides(toml_content, "<built-in>", args)
    }

    fn parse_with_overrides(
        toml_content: &str,
        origin: &str,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let mut root_value: Value =
            toml_content
                .parse()
                .map_err(|source| ConfigError::TomlParse {
                    path: origin.to_owned(),
                    source,
                })?;

        for (key_path, raw_value) in parse_cli_overrides(args)? {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        let config: Self = root_value.try_into().map_err(ConfigError::Deserialize)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.pool_size == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "workers.pool_size".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.server.read_buffer_size == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "server.read_buffer_size".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.wire.max_frame_size_bytes < MAX_REQUEST_FRAME_BYTES {
            return Err(ConfigError::InvalidSetting {
                key: "wire.max_frame_size_bytes".to_owned(),
                reason: format!(
                    "must be at least {MAX_REQUEST_FRAME_BYTES} to admit the longest request"
                ),
            });
        }
        if crate::wire::frame::FramingMode::parse(&self.wire.framing).is_none() {
            return Err(ConfigError::InvalidSetting {
                key: "wire.framing".to_owned(),
                reason: format!(
                    "'{}' is not one of: single_read, length_prefixed",
                    self.wire.framing
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
    InvalidSetting {
        key: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI argument '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
            Self::InvalidSetting { key, reason } => write!(f, "invalid setting '{key}': {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse_cli_overrides(
    args: impl IntoIterator<Item = String>,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        parsed.push((stripped.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }
    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let (final_key, sections) = parts.split_last().ok_or_else(unknown)?;
    let mut current = root;
    for section in sections {
        current = current
            .as_table_mut()
            .and_then(|table| table.get_mut(*section))
            .ok_or_else(unknown)?;
    }

    let current_value = current
        .as_table_mut()
        .and_then(|table| table.get_mut(*final_key))
        .ok_or_else(unknown)?;

    *current_value = parse_value_using_current_type(key_path, raw_value, current_value)?;
    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}
