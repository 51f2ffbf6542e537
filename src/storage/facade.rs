use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::utils::timing::millis_since;
use crate::wire::message::{ErrorKind, Request, RequestType, NO_MESSAGE_ID};

use super::{
    expand_home_path, MemoryStorage, SledMode, SledStorage, SledTuning, StorageBackend,
    StorageEngine, StorageError, Store, StoreOutcome, StoredMessage,
};

pub struct StorageFacade {
    engine: StorageEngine,
    data_path: Option<PathBuf>,
    backend: Box<dyn StorageBackend>,
}

impl StorageFacade {
    pub fn initialize(app_config: &AppConfig, logger: &Logger) -> Result<Self, StorageError> {
        let engine = StorageEngine::from_config(&app_config.storage)?;

        if !engine.is_durable() {
            logger.log(
                LogLevel::Info,
                Some("storage::init"),
                "Storage facade initialized",
                Some(json!({ "engine": engine.as_str() })),
            );
            return Ok(Self::in_memory());
        }

        let tuning = SledTuning::from_config(&app_config.storage.sled)?;
        let data_path = expand_home_path(&app_config.storage.path)?;

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Initializing storage facade",
            Some(json!({
                "engine": engine.as_str(),
                "configured_path": app_config.storage.path,
                "resolved_path": data_path.display().to_string(),
                "sled": {
                    "cache_capacity": tuning.cache_capacity,
                    "mode": tuning.mode.map(SledMode::as_str)
                }
            })),
        );

        fs::create_dir_all(&data_path).map_err(|source| StorageError::CreateDataDir {
            path: data_path.clone(),
            source,
        })?;

        let backend = SledStorage::open(&data_path, tuning)?;

        logger.log(
            LogLevel::Info,
            Some("storage::init"),
            "Storage facade initialized",
            Some(json!({
                "engine": engine.as_str(),
                "resolved_path": data_path.display().to_string(),
            })),
        );

        Ok(Self {
            engine,
            data_path: Some(data_path),
            backend: Box::new(backend),
        })
    }

    pub fn in_memory() -> Self {
        Self::with_backend(StorageEngine::Memory, Box::new(MemoryStorage::new()))
    }

    pub fn with_backend(engine: StorageEngine, backend: Box<dyn StorageBackend>) -> Self {
        Self {
            engine,
            data_path: None,
            backend,
        }
    }

    pub fn engine(&self) -> StorageEngine {
        self.engine
    }

    pub fn data_path(&self) -> Option<&Path> {
        self.data_path.as_deref()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.backend.flush()
    }

    fn run(&self, request: &Request) -> Result<StoreOutcome, StorageError> {
        let outcome = match request.request_type {
            RequestType::SendMessage => {
                let message_id = self.backend.send_message(
                    request.sender_id,
                    request.receiver(),
                    request.queue_id,
                    request.message_body(),
                )?;
                StoreOutcome::found(message_id, String::new())
            }
            RequestType::ReceiveFromReceiver => {
                retrieved(self.backend.receive_from_receiver(request.receiver_id)?)
            }
            RequestType::ReadFromQueue => {
                retrieved(self.backend.read_from_queue(request.queue_id, false)?)
            }
            RequestType::ReadFromQueueWithDelete => {
                retrieved(self.backend.read_from_queue(request.queue_id, true)?)
            }
            RequestType::QueryQueueForReceiver => {
                match self.backend.query_queue_for_receiver(request.receiver_id)? {
                    Some(queue_id) => StoreOutcome::found(
                        NO_MESSAGE_ID,
                        format!("Queue where messages are waiting: {queue_id}"),
                    ),
                    None => StoreOutcome::with_kind(ErrorKind::NotFound),
                }
            }
            RequestType::CreateQueue => {
                self.backend.create_queue(request.queue_id)?;
                StoreOutcome::with_kind(ErrorKind::NoError)
            }
            RequestType::DeleteQueue => {
                self.backend.delete_queue(request.queue_id)?;
                StoreOutcome::with_kind(ErrorKind::NoError)
            }
        };
        Ok(outcome)
    }
}

fn retrieved(message: Option<StoredMessage>) -> StoreOutcome {
    match message {
        Some(message) => StoreOutcome::found(message.id, message.body),
        None => StoreOutcome::with_kind(ErrorKind::NotFound),
    }
}

impl Store for StorageFacade {
    fn execute(&self, request: &Request) -> StoreOutcome {
        let started_at = Instant::now();
        let mut outcome = self
            .run(request)
            .unwrap_or_else(|error| StoreOutcome::failed(&error));
        outcome.execution_time_millis = millis_since(started_at);
        outcome
    }
}
