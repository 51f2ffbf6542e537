mod backend;
mod engine;
mod error;
mod facade;
mod memory_backend;
mod path;
mod sled_backend;

pub use backend::{StorageBackend, StoredMessage};
pub use engine::{SledMode, SledTuning, StorageEngine};
pub use error::StorageError;
pub use facade::StorageFacade;
pub use memory_backend::MemoryStorage;
use path::expand_home_path;
pub use sled_backend::SledStorage;

use crate::wire::message::{ErrorKind, Request, NO_MESSAGE_ID};

#[derive(Clone, Debug, PartialEq)]
pub struct StoreOutcome {
    pub error_kind: ErrorKind,
    pub message_id: i32,
    pub retrieved_message: String,
    pub execution_time_millis: f64,
    pub failure: Option<String>,
}

impl StoreOutcome {
    pub fn with_kind(error_kind: ErrorKind) -> Self {
        Self {
            error_kind,
            message_id: NO_MESSAGE_ID,
            retrieved_message: String::new(),
            execution_time_millis: 0.0,
            failure: None,
        }
    }

    pub fn found(message_id: i32, retrieved_message: String) -> Self {
        Self {
            message_id,
            retrieved_message,
            ..Self::with_kind(ErrorKind::NoError)
        }
    }

    pub fn failed(error: &StorageError) -> Self {
        Self {
            failure: Some(error.to_string()),
            ..Self::with_kind(error.error_kind())
        }
    }
}

/// The operation contract the worker pool calls into. Blocking; never
/// invoked from the reactor thread.
pub trait Store: Send + Sync {
    fn execute(&self, request: &Request) -> StoreOutcome;
}
