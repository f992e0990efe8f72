//! Process-local store on DashMap.
//!
//! Used when Redis is disabled or unreachable at startup, and throughout the
//! test suites. Atomic operations hold the DashMap shard lock for the duration
//! of a single synchronous closure, so they are atomic with respect to every
//! other caller in this process. Nothing is shared across processes.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::{BTreeSet, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::keys::glob_match;
use crate::traits::{KeyValueStore, ScanPage, StoreBackend, WindowProbe};
use crate::ttl_millis;

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
    Sorted(BTreeSet<(i64, String)>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Cursor position of a key. Positions depend only on the key, so deleting
/// keys between pages never makes a scan skip the survivors. Never zero.
fn scan_position(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() | 1
}

/// In-memory `KeyValueStore`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Slot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Entries held, including expired ones not yet reclaimed.
    pub fn held_entries(&self) -> usize {
        self.entries.len()
    }

    /// Remaining time to live, if the key exists and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Read a live slot, evicting it if expired.
    fn read<T>(&self, key: &str, f: impl FnOnce(&Slot) -> T) -> Option<T> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(slot) if !slot.is_expired(now) => return Some(f(&slot)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        }
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn backend(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.read(key, |slot| slot.value.clone()) {
            None => Ok(None),
            Some(Value::Bytes(bytes)) => Ok(Some(bytes)),
            Some(_) => Err(StoreError::wrong_type(key, "bytes")),
        }
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        ttl_millis(ttl)?;
        self.entries
            .insert(key.to_string(), Slot::new(Value::Bytes(value.to_vec()), Some(ttl)));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<bool> {
        ttl_millis(ttl)?;
        let now = Instant::now();
        let slot = Slot::new(Value::Bytes(value.to_vec()), Some(ttl));
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(slot);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, slot)| !slot.is_expired(now)))
    }

    async fn delete_many(&self, keys: &[String]) -> StoreResult<u64> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read(key, |_| ()).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        ttl_millis(ttl)?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => {
                slot.expires_at = now.checked_add(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot::new(Value::Set(HashSet::new()), None));
                }
                match &mut occupied.get_mut().value {
                    Value::Set(set) => Ok(set.insert(member.to_string())),
                    _ => Err(StoreError::wrong_type(key, "set")),
                }
            }
            Entry::Vacant(vacant) => {
                let set = HashSet::from([member.to_string()]);
                vacant.insert(Slot::new(Value::Set(set), None));
                Ok(true)
            }
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(now) => match &mut slot.value {
                Value::Set(set) => Ok(set.remove(member)),
                _ => Err(StoreError::wrong_type(key, "set")),
            },
            _ => Ok(false),
        }
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.read(key, |slot| slot.value.clone()) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.into_iter().collect()),
            Some(_) => Err(StoreError::wrong_type(key, "set")),
        }
    }

    /// Each page walks the whole map, so a complete scan of `n` entries costs
    /// `O(n * n / count)` hashing. Only the page itself is sorted.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> StoreResult<ScanPage> {
        let now = Instant::now();
        let mut matched: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let position = scan_position(entry.key());
                (position >= cursor
                    && !entry.value().is_expired(now)
                    && glob_match(pattern, entry.key()))
                .then(|| (position, entry.key().clone()))
            })
            .collect();

        let take = count.max(1);
        let next = if matched.len() > take {
            matched.select_nth_unstable(take);
            let next = matched[take].0;
            matched.truncate(take);
            next
        } else {
            0
        };
        matched.sort_unstable();

        Ok(ScanPage {
            cursor: next,
            keys: matched.into_iter().map(|(_, key)| key).collect(),
        })
    }

    async fn db_size(&self) -> StoreResult<u64> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count() as u64)
    }

    async fn window_probe(&self, key: &str, probe: &WindowProbe) -> StoreResult<u64> {
        ttl_millis(probe.ttl)?;
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(Value::Sorted(BTreeSet::new()), None));

        if entry.is_expired(now) {
            *entry = Slot::new(Value::Sorted(BTreeSet::new()), None);
        }
        let slot = entry.value_mut();
        let Value::Sorted(set) = &mut slot.value else {
            return Err(StoreError::wrong_type(key, "sorted set"));
        };

        set.retain(|(score, _)| *score > probe.window_start);
        set.insert((probe.score, probe.member.clone()));
        let count = set.len() as u64;
        slot.expires_at = now.checked_add(probe.ttl);
        Ok(count)
    }

    /// Expired entries are otherwise only evicted when their key is touched
    /// again, so callers that never return would be held forever.
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}
