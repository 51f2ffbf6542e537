use std::fmt;
use std::path::PathBuf;

use crate::wire::message::ErrorKind;

#[derive(Debug)]
pub enum StorageError {
    UnsupportedEngine {
        engine: String,
    },
    InvalidSledMode {
        mode: String,
    },
    HomeDirectoryUnavailable,
    CreateDataDir {
        path: PathBuf,
        source: std::io::Error,
    },
    QueueNotFound {
        queue_id: i32,
    },
    QueueAlreadyExists {
        queue_id: i32,
    },
    MessageIdExhausted {
        generated: u64,
    },
    Contention {
        operation: &'static str,
        attempts: usize,
    },
    SerializeMessage(serde_json::Error),
    DeserializeMessage(serde_json::Error),
    Sled(sled::Error),
}

impl StorageError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::QueueNotFound { .. } | Self::QueueAlreadyExists { .. } => {
                ErrorKind::ConstraintViolation
            }
            _ => ErrorKind::ExecutionError,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedEngine { engine } => write!(
                f,
                "unsupported storage.engine '{}'; allowed values: sled, memory",
                engine
            ),
            Self::InvalidSledMode { mode } => write!(
                f,
                "invalid storage.sled.mode '{}'; allowed values: low_space, high_throughput",
                mode
            ),
            Self::HomeDirectoryUnavailable => {
                write!(f, "cannot resolve storage path because HOME is not set")
            }
            Self::CreateDataDir { path, source } => write!(
                f,
                "failed to create storage data directory '{}': {source}",
                path.display()
            ),
            Self::QueueNotFound { queue_id } => write!(f, "queue {queue_id} does not exist"),
            Self::QueueAlreadyExists { queue_id } => write!(f, "queue {queue_id} already exists"),
            Self::MessageIdExhausted { generated } => {
                write!(f, "generated message id {generated} does not fit in an i32")
            }
            Self::Contention {
                operation,
                attempts,
            } => write!(
                f,
                "{operation} gave up after {attempts} attempts lost to concurrent consumers"
            ),
            Self::SerializeMessage(source) => {
                write!(f, "failed to serialize message for storage: {source}")
            }
            Self::DeserializeMessage(source) => {
                write!(f, "failed to deserialize message from storage: {source}")
            }
            Self::Sled(source) => write!(f, "sled storage error: {source}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<sled::Error> for StorageError {
    fn from(source: sled::Error) -> Self {
        Self::Sled(source)
    }
}
