use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::utils::crypto::HashPos;

/// A stored record. `key` is the plaintext the key id was derived from;
/// on a key id collision the last written plaintext wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
}

pub type KvStore = HashMap<HashPos, Record>;

/// In-memory key-value storage shared by all connection handlers of a node.
/// Every operation takes the lock exactly once; `get_all` hands out a
/// detached copy so callers never iterate under the lock.
#[derive(Debug, Default)]
pub struct Storage {
    data: Mutex<KvStore>,
}

impl Storage {
    pub fn new() -> Storage {
        Storage::default()
    }

    /// Concat merge: a duplicate key id appends `",value"` to the stored
    /// value instead of overwriting it.
    pub fn insert(&self, key_id: HashPos, key: &str, value: &str) {
        let mut data = self.data.lock().unwrap();
        match data.get_mut(&key_id) {
            Some(record) => {
                record.value.push(',');
                record.value.push_str(value);
                record.key = key.to_string();
            }
            None => {
                data.insert(
                    key_id,
                    Record {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                );
            }
        }
    }

    pub fn query(&self, key_id: HashPos) -> Option<Record> {
        self.data.lock().unwrap().get(&key_id).cloned()
    }

    /// Removes the record if present. Deleting an absent key is a no-op.
    pub fn delete(&self, key_id: HashPos) -> bool {
        self.data.lock().unwrap().remove(&key_id).is_some()
    }

    pub fn get_all(&self) -> KvStore {
        self.data.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.data.lock().unwrap().clear()
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
