use std::path::Path;

use sled::transaction::{
    abort, ConflictableTransactionResult, TransactionError, Transactional, TransactionalTree,
};
use sled::IVec;

use super::{SledTuning, StorageBackend, StorageError, StoredMessage};

const QUEUES_TREE: &str = "queues";
const MESSAGES_TREE: &str = "messages";
const BY_QUEUE_TREE: &str = "by_queue";
const BY_RECEIVER_TREE: &str = "by_receiver";

const MAX_CONSUME_ATTEMPTS: usize = 16;

type TreeViews = (
    TransactionalTree,
    TransactionalTree,
    TransactionalTree,
    TransactionalTree,
);

pub struct SledStorage {
    db: sled::Db,
    queues: sled::Tree,
    messages: sled::Tree,
    by_queue: sled::Tree,
    by_receiver: sled::Tree,
}

#[derive(Clone, Copy)]
enum Index {
    Queue,
    Receiver,
}

impl SledStorage {
    pub fn open(data_path: &Path, tuning: SledTuning) -> Result<Self, StorageError> {
        let db = tuning.apply(sled::Config::new().path(data_path)).open()?;
        Ok(Self {
            queues: db.open_tree(QUEUES_TREE)?,
            messages: db.open_tree(MESSAGES_TREE)?,
            by_queue: db.open_tree(BY_QUEUE_TREE)?,
            by_receiver: db.open_tree(BY_RECEIVER_TREE)?,
            db,
        })
    }

    fn index(&self, index: Index) -> &sled::Tree {
        match index {
            Index::Queue => &self.by_queue,
            Index::Receiver => &self.by_receiver,
        }
    }

    fn transact<T, F>(&self, body: F) -> Result<T, StorageError>
    where
        F: Fn(&TreeViews) -> ConflictableTransactionResult<T, StorageError>,
    {
        (&self.queues, &self.messages, &self.by_queue, &self.by_receiver)
            .transaction(body)
            .map_err(|error| match error {
                TransactionError::Abort(source) => source,
                TransactionError::Storage(source) => StorageError::Sled(source),
            })
    }

    fn next_message_id(&self) -> Result<i32, StorageError> {
        let generated = self.db.generate_id()?;
        i32::try_from(generated).map_err(|_| StorageError::MessageIdExhausted { generated })
    }

    fn load_message(&self, message_key: &[u8]) -> Result<Option<StoredMessage>, StorageError> {
        self.messages
            .get(message_key)?
            .map(|raw| serde_json::from_slice(&raw).map_err(StorageError::DeserializeMessage))
            .transpose()
    }

    /// Oldest message referenced by `index` under `owner_id`. Entries whose
    /// message vanished between the scan and the lookup are skipped.
    fn peek_oldest(
        &self,
        index: Index,
        owner_id: i32,
    ) -> Result<Option<(IVec, StoredMessage)>, StorageError> {
        for entry in self.index(index).scan_prefix(sortable_id(owner_id)) {
            let (_, message_key) = entry?;
            if let Some(message) = self.load_message(&message_key)? {
                return Ok(Some((message_key, message)));
            }
        }
        Ok(None)
    }

    fn consume_oldest(
        &self,
        index: Index,
        owner_id: i32,
        operation: &'static str,
    ) -> Result<Option<StoredMessage>, StorageError> {
        for _ in 0..MAX_CONSUME_ATTEMPTS {
            let Some((message_key, _)) = self.peek_oldest(index, owner_id)? else {
                return Ok(None);
            };

            let consumed = self.transact(|(_, messages, by_queue, by_receiver)| {
                let Some(raw) = messages.get(&message_key[..])? else {
                    return Ok(None);
                };
                let message: StoredMessage = match serde_json::from_slice(&raw) {
                    Ok(message) => message,
                    Err(source) => return abort(StorageError::DeserializeMessage(source)),
                };
                messages.remove(&message_key[..])?;
                by_queue.remove(&composite_key(message.queue_id, message.id)[..])?;
                if let Some(receiver_id) = message.receiver_id {
                    by_receiver.remove(&composite_key(receiver_id, message.id)[..])?;
                }
                Ok(Some(message))
            })?;

            if consumed.is_some() {
                return Ok(consumed);
            }
        }

        Err(StorageError::Contention {
            operation,
            attempts: MAX_CONSUME_ATTEMPTS,
        })
    }
}

/// Big-endian with the sign bit flipped so negative ids sort before positive ones.
fn sortable_id(id: i32) -> [u8; 4] {
    ((id as u32) ^ 0x8000_0000).to_be_bytes()
}

fn composite_key(owner_id: i32, message_id: i32) -> [u8; 8] {
    let mut key = [0_u8; 8];
    key[..4].copy_from_slice(&sortable_id(owner_id));
    key[4..].copy_from_slice(&sortable_id(message_id));
    key
}

impl StorageBackend for SledStorage {
    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn create_queue(&self, queue_id: i32) -> Result<(), StorageError> {
        self.queues
            .compare_and_swap(sortable_id(queue_id), None::<&[u8]>, Some(Vec::<u8>::new()))?
            .map_err(|_| StorageError::QueueAlreadyExists { queue_id })
    }

    fn delete_queue(&self, queue_id: i32) -> Result<(), StorageError> {
        let queue_key = sortable_id(queue_id);
        self.transact(|(queues, _, _, _)| {
            queues.remove(&queue_key[..])?;
            Ok(())
        })?;

        // Sends that committed before the queue key went away still need sweeping.
        while self
            .consume_oldest(Index::Queue, queue_id, "delete_queue")?
            .is_some()
        {}

        Ok(())
    }

    fn send_message(
        &self,
        sender_id: i32,
        receiver_id: Option<i32>,
        queue_id: i32,
        body: &str,
    ) -> Result<i32, StorageError> {
        let id = self.next_message_id()?;
        let record = serde_json::to_vec(&StoredMessage {
            id,
            sender_id,
            receiver_id,
            queue_id,
            body: body.to_owned(),
        })
        .map_err(StorageError::SerializeMessage)?;

        let queue_key = sortable_id(queue_id);
        let message_key = sortable_id(id);
        let queue_index_key = composite_key(queue_id, id);
        let receiver_index_key = receiver_id.map(|receiver_id| composite_key(receiver_id, id));

        self.transact(|(queues, messages, by_queue, by_receiver)| {
            if queues.get(&queue_key[..])?.is_none() {
                return abort(StorageError::QueueNotFound { queue_id });
            }
            messages.insert(&message_key[..], record.as_slice())?;
            by_queue.insert(&queue_index_key[..], &message_key[..])?;
            if let Some(receiver_index_key) = &receiver_index_key {
                by_receiver.insert(&receiver_index_key[..], &message_key[..])?;
            }
            Ok(id)
        })
    }

    fn receive_from_receiver(
        &self,
        receiver_id: i32,
    ) -> Result<Option<StoredMessage>, StorageError> {
        self.consume_oldest(Index::Receiver, receiver_id, "receive_from_receiver")
    }

    fn read_from_queue(
        &self,
        queue_id: i32,
        delete: bool,
    ) -> Result<Option<StoredMessage>, StorageError> {
        if delete {
            return self.consume_oldest(Index::Queue, queue_id, "read_from_queue_with_delete");
        }
        Ok(self
            .peek_oldest(Index::Queue, queue_id)?
            .map(|(_, message)| message))
    }

    fn query_queue_for_receiver(&self, receiver_id: i32) -> Result<Option<i32>, StorageError> {
        Ok(self
            .peek_oldest(Index::Receiver, receiver_id)?
            .map(|(_, message)| message.queue_id))
    }
}
