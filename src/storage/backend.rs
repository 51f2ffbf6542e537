use serde::{Deserialize, Serialize};

use super::StorageError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i32,
    pub sender_id: i32,
    pub receiver_id: Option<i32>,
    pub queue_id: i32,
    pub body: String,
}

pub trait StorageBackend: Send + Sync {
    fn flush(&self) -> Result<(), StorageError>;

    fn create_queue(&self, queue_id: i32) -> Result<(), StorageError>;

    /// Removing a missing queue is not an error. Its messages go with it.
    fn delete_queue(&self, queue_id: i32) -> Result<(), StorageError>;

    fn send_message(
        &self,
        sender_id: i32,
        receiver_id: Option<i32>,
        queue_id: i32,
        body: &str,
    ) -> Result<i32, StorageError>;

    fn receive_from_receiver(&self, receiver_id: i32)
        -> Result<Option<StoredMessage>, StorageError>;

    fn read_from_queue(
        &self,
        queue_id: i32,
        delete: bool,
    ) -> Result<Option<StoredMessage>, StorageError>;

    fn query_queue_for_receiver(&self, receiver_id: i32) -> Result<Option<i32>, StorageError>;
}
