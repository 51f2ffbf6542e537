use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use super::{StorageBackend, StorageError, StoredMessage};

#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    queues: BTreeSet<i32>,
    // Keyed by id; ids only grow, so iteration order is arrival order.
    messages: BTreeMap<i32, StoredMessage>,
    next_id: i32,
}

impl MemoryState {
    fn oldest_where(&self, predicate: impl Fn(&StoredMessage) -> bool) -> Option<i32> {
        self.messages
            .values()
            .find(|message| predicate(message))
            .map(|message| message.id)
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn create_queue(&self, queue_id: i32) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("memory storage mutex poisoned");
        if !state.queues.insert(queue_id) {
            return Err(StorageError::QueueAlreadyExists { queue_id });
        }
        Ok(())
    }

    fn delete_queue(&self, queue_id: i32) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("memory storage mutex poisoned");
        state.queues.remove(&queue_id);
        state
            .messages
            .retain(|_, message| message.queue_id != queue_id);
        Ok(())
    }

    fn send_message(
        &self,
        sender_id: i32,
        receiver_id: Option<i32>,
        queue_id: i32,
        body: &str,
    ) -> Result<i32, StorageError> {
        let mut state = self.state.lock().expect("memory storage mutex poisoned");
        if !state.queues.contains(&queue_id) {
            return Err(StorageError::QueueNotFound { queue_id });
        }

        let id = state.next_id;
        state.next_id = id
            .checked_add(1)
            .ok_or(StorageError::MessageIdExhausted {
                generated: id as u64 + 1,
            })?;
        state.messages.insert(
            id,
            StoredMessage {
                id,
                sender_id,
                receiver_id,
                queue_id,
                body: body.to_owned(),
            },
        );
        Ok(id)
    }

    fn receive_from_receiver(
        &self,
        receiver_id: i32,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let mut state = self.state.lock().expect("memory storage mutex poisoned");
        let oldest = state.oldest_where(|message| message.receiver_id == Some(receiver_id));
        Ok(oldest.and_then(|id| state.messages.remove(&id)))
    }

    fn read_from_queue(
        &self,
        queue_id: i32,
        delete: bool,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let mut state = self.state.lock().expect("memory storage mutex poisoned");
        let Some(id) = state.oldest_where(|message| message.queue_id == queue_id) else {
            return Ok(None);
        };
        if delete {
            Ok(state.messages.remove(&id))
        } else {
            Ok(state.messages.get(&id).cloned())
        }
    }

    fn query_queue_for_receiver(&self, receiver_id: i32) -> Result<Option<i32>, StorageError> {
        let state = self.state.lock().expect("memory storage mutex poisoned");
        Ok(state
            .messages
            .values()
            .find(|message| message.receiver_id == Some(receiver_id))
            .map(|message| message.queue_id))
    }
}
