use crate::index::DocumentIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
    pub document_id: String,
    pub inserted_at: Instant,
    pub last_access: Instant,
    pub access_seq: u64,
    pub chunk_count: usize,
}

pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &str;

    fn is_expired(&self, _entry: &EntryStats, _now: Instant) -> bool {
        false
    }

    fn select_victims(&self, entries: &[EntryStats], now: Instant) -> Vec<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn name(&self) -> &str {
        "unbounded"
    }

    fn select_victims(&self, _entries: &[EntryStats], _now: Instant) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LruPolicy {
    capacity: usize,
}

impl LruPolicy {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &str {
        "lru"
    }

    fn select_victims(&self, entries: &[EntryStats], _now: Instant) -> Vec<String> {
        if entries.len() <= self.capacity {
            return Vec::new();
        }

        let mut by_recency: Vec<&EntryStats> = entries.iter().collect();
        by_recency.sort_by_key(|entry| entry.access_seq);
        by_recency
            .into_iter()
            .take(entries.len() - self.capacity)
            .map(|entry| entry.document_id.clone())
            .collect()
    }
}

/// Drops indices that have not been read or replaced for longer than `max_idle`.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    max_idle: Duration,
}

impl TtlPolicy {
    pub fn new(max_idle: Duration) -> Self {
        Self { max_idle }
    }
}

impl EvictionPolicy for TtlPolicy {
    fn name(&self) -> &str {
        "ttl"
    }

    fn is_expired(&self, entry: &EntryStats, now: Instant) -> bool {
        now.saturating_duration_since(entry.last_access) > self.max_idle
    }

    fn select_victims(&self, entries: &[EntryStats], now: Instant) -> Vec<String> {
        entries
            .iter()
            .filter(|entry| self.is_expired(entry, now))
            .map(|entry| entry.document_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct SlotStats {
    inserted_at: Instant,
    last_access: Instant,
    access_seq: u64,
    chunk_count: Option<usize>,
}

struct Slot {
    index: RwLock<Option<Arc<DocumentIndex>>>,
    stats: StdMutex<SlotStats>,
}

impl Slot {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            index: RwLock::new(None),
            stats: StdMutex::new(SlotStats {
                inserted_at: now,
                last_access: now,
                access_seq: 0,
                chunk_count: None,
            }),
        }
    }

    fn entry_stats(&self, document_id: &str) -> Option<EntryStats> {
        let stats = *lock_unpoisoned(&self.stats);
        stats.chunk_count.map(|chunk_count| EntryStats {
            document_id: document_id.to_string(),
            inserted_at: stats.inserted_at,
            last_access: stats.last_access,
            access_seq: stats.access_seq,
            chunk_count,
        })
    }

    fn publish(&self, access_seq: u64, chunk_count: usize) {
        let now = Instant::now();
        let mut stats = lock_unpoisoned(&self.stats);
        stats.inserted_at = now;
        stats.last_access = now;
        stats.access_seq = access_seq;
        stats.chunk_count = Some(chunk_count);
    }

    fn touch(&self, access_seq: u64) {
        let mut stats = lock_unpoisoned(&self.stats);
        stats.last_access = Instant::now();
        stats.access_seq = access_seq;
    }

    fn clear(&self) {
        lock_unpoisoned(&self.stats).chunk_count = None;
    }
}

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held while an index for one document id is being built; serializes builds and deletes
/// of the same id.
pub struct BuildGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Sole owner of every published [`DocumentIndex`], keyed by document id.
///
/// Each id has its own slot lock, so operations on different ids never wait on each other;
/// the maps themselves are only locked for short, non-async sections. A published index is
/// immutable, so a reader that obtained it before a delete keeps a complete index for the
/// rest of its call. Build locks live apart from slots: eviction drops a slot but never a
/// lock that a build holds or waits on.
pub struct IndexRegistry {
    slots: StdMutex<HashMap<String, Arc<Slot>>>,
    builds: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    policy: Box<dyn EvictionPolicy>,
    clock: AtomicU64,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::with_policy(Unbounded)
    }

    pub fn with_policy(policy: impl EvictionPolicy + 'static) -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
            builds: StdMutex::new(HashMap::new()),
            policy: Box::new(policy),
            clock: AtomicU64::new(0),
        }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub async fn lock_for_build(&self, document_id: &str) -> BuildGuard {
        let guard = self.build_lock(document_id).lock_owned().await;
        BuildGuard { _guard: guard }
    }

    pub async fn put(&self, document_id: &str, index: DocumentIndex) {
        let index = Arc::new(index);
        let chunk_count = index.len();

        loop {
            let slot = self.lookup_or_create(document_id);
            let mut published = slot.index.write().await;
            if !self.is_current(document_id, &slot) {
                continue;
            }
            *published = Some(Arc::clone(&index));
            slot.publish(self.tick(), chunk_count);
            break;
        }

        debug!(document_id, chunk_count, "published document index");
        self.evict(document_id).await;
    }

    pub async fn get(&self, document_id: &str) -> Option<Arc<DocumentIndex>> {
        let slot = self.lookup(document_id)?;
        let index = slot.index.read().await.as_ref().map(Arc::clone)?;

        let expired = slot
            .entry_stats(document_id)
            .is_some_and(|stats| self.policy.is_expired(&stats, Instant::now()));
        if expired {
            if self.remove_slot(document_id, &slot).await {
                info!(document_id, policy = self.policy.name(), "document index expired");
            }
            return None;
        }

        slot.touch(self.tick());
        Some(index)
    }

    /// Removes the index for `document_id`; absent ids are a no-op. Waits for an in-flight
    /// build of the same id to publish first.
    pub async fn delete(&self, document_id: &str) {
        let _build = self.lock_for_build(document_id).await;
        let Some(slot) = self.lookup(document_id) else {
            return;
        };
        if self.remove_slot(document_id, &slot).await {
            info!(document_id, "document index deleted");
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<EntryStats> {
        let slots = lock_unpoisoned(&self.slots);
        let mut entries: Vec<EntryStats> = slots
            .iter()
            .filter_map(|(document_id, slot)| slot.entry_stats(document_id))
            .collect();
        entries.sort_by(|left, right| right.access_seq.cmp(&left.access_seq));
        entries
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    // Idle locks (nobody holding or waiting) are pruned here, under the map lock.
    fn build_lock(&self, document_id: &str) -> Arc<Mutex<()>> {
        let mut builds = lock_unpoisoned(&self.builds);
        builds.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            builds
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn lookup(&self, document_id: &str) -> Option<Arc<Slot>> {
        lock_unpoisoned(&self.slots).get(document_id).cloned()
    }

    fn lookup_or_create(&self, document_id: &str) -> Arc<Slot> {
        let mut slots = lock_unpoisoned(&self.slots);
        Arc::clone(
            slots
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    fn is_current(&self, document_id: &str, slot: &Arc<Slot>) -> bool {
        lock_unpoisoned(&self.slots)
            .get(document_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn remove_slot(&self, document_id: &str, slot: &Arc<Slot>) -> bool {
        let mut published = slot.index.write().await;
        let existed = published.take().is_some();
        slot.clear();

        let mut slots = lock_unpoisoned(&self.slots);
        if slots
            .get(document_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(document_id);
        }
        existed
    }

    async fn evict(&self, keep: &str) {
        let victims: Vec<(String, Arc<Slot>)> = {
            let slots = lock_unpoisoned(&self.slots);
            let entries: Vec<EntryStats> = slots
                .iter()
                .filter_map(|(document_id, slot)| slot.entry_stats(document_id))
                .collect();

            self.policy
                .select_victims(&entries, Instant::now())
                .into_iter()
                .filter(|document_id| document_id != keep)
                .filter_map(|document_id| {
                    let slot = slots.get(&document_id).cloned()?;
                    Some((document_id, slot))
                })
                .collect()
        };

        for (document_id, slot) in victims {
            if self.remove_slot(&document_id, &slot).await {
                info!(
                    document_id = %document_id,
                    policy = self.policy.name(),
                    "evicted document index"
                );
            }
        }
    }
}
