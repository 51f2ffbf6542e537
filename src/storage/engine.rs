use crate::config::{SledConfig, StorageConfig};

use super::StorageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageEngine {
    Sled,
    Memory,
}

impl StorageEngine {
    pub fn from_config(storage: &StorageConfig) -> Result<Self, StorageError> {
        match storage.engine.trim() {
            "sled" => Ok(Self::Sled),
            "memory" => Ok(Self::Memory),
            other => Err(StorageError::UnsupportedEngine {
                engine: other.to_owned(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sled => "sled",
            Self::Memory => "memory",
        }
    }

    pub fn is_durable(self) -> bool {
        matches!(self, Self::Sled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SledMode {
    LowSpace,
    HighThroughput,
}

impl SledMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowSpace => "low_space",
            Self::HighThroughput => "high_throughput",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SledTuning {
    pub cache_capacity: Option<u64>,
    pub mode: Option<SledMode>,
}

impl SledTuning {
    pub fn from_config(sled: &SledConfig) -> Result<Self, StorageError> {
        let mode = match sled.mode.as_deref().map(str::trim) {
            None => None,
            Some("low_space") => Some(SledMode::LowSpace),
            Some("high_throughput") => Some(SledMode::HighThroughput),
            Some(other) => {
                return Err(StorageError::InvalidSledMode {
                    mode: other.to_owned(),
                })
            }
        };
        Ok(Self {
            cache_capacity: sled.cache_capacity,
            mode,
        })
    }

    pub(crate) fn apply(self, mut config: sled::Config) -> sled::Config {
        if let Some(cache_capacity) = self.cache_capacity {
            config = config.cache_capacity(cache_capacity);
        }
        match self.mode {
            Some(SledMode::LowSpace) => config.mode(sled::Mode::LowSpace),
            Some(SledMode::HighThroughput) => config.mode(sled::Mode::HighThroughput),
            None => config,
        }
    }
}
