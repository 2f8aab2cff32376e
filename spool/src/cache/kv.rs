//! Key-value store seam under the shared metadata cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{CacheError, Result};

/// A write applied as part of an atomic group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Store `value` at `key`, replacing whatever was there.
    Set {
        /// Target key.
        key: Vec<u8>,
        /// Value to store.
        value: Vec<u8>,
    },
    /// Prepend `value` to the list at `key`, creating the list if needed.
    ListPush {
        /// Target list key.
        key: Vec<u8>,
        /// Element to prepend.
        value: Vec<u8>,
    },
}

/// The operations the shared cache needs from its backend.
///
/// Keys hold either a plain value or a list. Operations on a key holding the
/// other kind fail with [`CacheError::WrongType`].
pub trait KeyValueStore: Send + Sync {
    /// Reads the value at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or `key` holds a list.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores `value` at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes `key` and whatever it holds.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Every element of the list at `key`, most recently pushed first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or `key` holds a plain value.
    fn list(&self, key: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Applies every operation or none of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable or any operation would fail.
    fn apply_atomic(&self, ops: &[WriteOp]) -> Result<()>;

    /// Number of keys in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    fn key_count(&self) -> Result<u64>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        (**self).delete(key)
    }

    fn list(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        (**self).list(key)
    }

    fn apply_atomic(&self, ops: &[WriteOp]) -> Result<()> {
        (**self).apply_atomic(ops)
    }

    fn key_count(&self) -> Result<u64> {
        (**self).key_count()
    }
}

#[derive(Debug)]
enum Slot {
    Value(Vec<u8>),
    List(VecDeque<Vec<u8>>),
}

/// Process-local [`KeyValueStore`].
///
/// Share it between several caches (behind an `Arc`) to model collectors
/// sharing one remote store. It counts write commands and can be switched
/// offline to model a lost connection.
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    slots: Mutex<HashMap<Vec<u8>, Slot>>,
    writes: AtomicU64,
    online: AtomicBool,
}

impl MemoryKeyValueStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            writes: AtomicU64::new(0),
            online: AtomicBool::new(true),
        }
    }

    /// Number of write commands accepted so far. An atomic group counts once.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Makes every subsequent operation succeed (`true`) or fail as unreachable (`false`).
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    fn ensure_online(&self) -> Result<()> {
        if self.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(CacheError::Unavailable {
                reason: "in-memory store switched offline".to_string(),
            }
            .into())
        }
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

fn wrong_type(key: &[u8]) -> CacheError {
    CacheError::WrongType {
        key: String::from_utf8_lossy(key).into_owned(),
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_online()?;
        match self.slots.lock().get(key) {
            None => Ok(None),
            Some(Slot::Value(value)) => Ok(Some(value.clone())),
            Some(Slot::List(_)) => Err(wrong_type(key).into()),
        }
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_online()?;
        self.slots
            .lock()
            .insert(key.to_vec(), Slot::Value(value.to_vec()));
        self.record_write();
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_online()?;
        self.slots.lock().remove(key);
        self.record_write();
        Ok(())
    }

    fn list(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.ensure_online()?;
        match self.slots.lock().get(key) {
            None => Ok(Vec::new()),
            Some(Slot::List(items)) => Ok(items.iter().cloned().collect()),
            Some(Slot::Value(_)) => Err(wrong_type(key).into()),
        }
    }

    fn apply_atomic(&self, ops: &[WriteOp]) -> Result<()> {
        self.ensure_online()?;
        let mut slots = self.slots.lock();

        // Validate everything before touching anything.
        for op in ops {
            if let WriteOp::ListPush { key, .. } = op {
                if let Some(Slot::Value(_)) = slots.get(key) {
                    return Err(wrong_type(key).into());
                }
            }
        }

        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    slots.insert(key.clone(), Slot::Value(value.clone()));
                }
                WriteOp::ListPush { key, value } => {
                    let slot = slots
                        .entry(key.clone())
                        .or_insert_with(|| Slot::List(VecDeque::new()));
                    match slot {
                        Slot::List(items) => items.push_front(value.clone()),
                        // A Set earlier in this group replaced a list.
                        Slot::Value(_) => *slot = Slot::List(VecDeque::from([value.clone()])),
                    }
                }
            }
        }
        self.record_write();
        Ok(())
    }

    fn key_count(&self) -> Result<u64> {
        self.ensure_online()?;
        Ok(self.slots.lock().len() as u64)
    }
}
