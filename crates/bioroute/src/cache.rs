//! Predictive result cache.
//!
//! Keys are canonical SHA-256 digests: string queries hash directly, JSON
//! objects hash after recursive key sorting so field order never splits
//! entries. Capacity-bound with scored eviction (access count plus
//! normalized recency), not plain LRU: a frequently re-read old entry
//! outlives a once-touched new one. Snapshots persist as JSON through the
//! `SnapshotStore` seam; corrupt or missing snapshots start the cache
//! empty with a warning rather than failing construction.

use crate::error::OrchestratorError;
use crate::predictor::QueryFeatures;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_MAX_AGE_MS: i64 = 3_600_000;
pub const DEFAULT_PERSIST_PROBABILITY: f64 = 0.1;

/// Canonical cache key: SHA-256 over the canonical rendering of the query.
pub fn canonical_key(query: &Value) -> String {
    let rendering = match query {
        Value::String(s) => s.clone(),
        other => canonical_json(other),
    };
    let mut hasher = Sha256::new();
    hasher.update(rendering.as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON with object keys sorted at every level, so `{a,b}` and `{b,a}`
/// render identically. Arrays keep their order.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        leaf => leaf.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub max_age_ms: i64,
    pub features: QueryFeatures,
    pub source_query: Value,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at).num_milliseconds() <= self.max_age_ms
    }
}

/// Payload plus hit metadata for the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedOutcome {
    pub payload: Value,
    pub cache_hit: bool,
    pub key: String,
    /// Entry age at hit time; `None` on a miss.
    pub age_ms: Option<i64>,
    pub access_count: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub max_age_ms: i64,
    pub persist_probability: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_age_ms: DEFAULT_MAX_AGE_MS,
            persist_probability: DEFAULT_PERSIST_PROBABILITY,
        }
    }
}

/// Persistence seam for cache snapshots.
pub trait SnapshotStore: Send + Sync {
    fn save_snapshot(&self, entries: &[CacheEntry]) -> Result<(), OrchestratorError>;
    /// Tolerant load: missing or corrupt snapshots come back empty.
    fn load_snapshot(&self) -> Vec<CacheEntry>;
}

/// Whole-map JSON snapshot on disk.
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save_snapshot(&self, entries: &[CacheEntry]) -> Result<(), OrchestratorError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(entries)?;
        std::fs::write(&self.path, json)?;
        debug!(path = %self.path.display(), entries = entries.len(), "cache snapshot saved");
        Ok(())
    }

    fn load_snapshot(&self) -> Vec<CacheEntry> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "cache snapshot unreadable: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %self.path.display(), "cache snapshot corrupt, starting empty: {}", e);
                Vec::new()
            }
        }
    }
}

/// No persistence. Used by tests and ephemeral deployments.
pub struct NullSnapshotStore;

impl SnapshotStore for NullSnapshotStore {
    fn save_snapshot(&self, _entries: &[CacheEntry]) -> Result<(), OrchestratorError> {
        Ok(())
    }

    fn load_snapshot(&self) -> Vec<CacheEntry> {
        Vec::new()
    }
}

pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    store: Arc<dyn SnapshotStore>,
}

impl ResultCache {
    /// Build the cache, rehydrating fresh entries from the snapshot store.
    pub fn new(config: CacheConfig, store: Arc<dyn SnapshotStore>) -> Self {
        let now = Utc::now();
        let mut entries = HashMap::new();
        for entry in store.load_snapshot() {
            if entry.is_fresh(now) {
                entries.insert(entry.key.clone(), entry);
            }
        }
        // Capacity binds on rehydration too: a snapshot written under a
        // larger capacity must shrink to the current one.
        while entries.len() > config.capacity {
            evict_lowest_scored(&mut entries, now);
        }
        if !entries.is_empty() {
            debug!(entries = entries.len(), "cache rehydrated from snapshot");
        }
        Self {
            entries: Mutex::new(entries),
            config,
            store,
        }
    }

    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, Arc::new(NullSnapshotStore))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh-hit lookup without computing. Bumps access metadata.
    pub fn get(&self, query: &Value) -> Option<CachedOutcome> {
        let key = canonical_key(query);
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(&key)?;
        if !entry.is_fresh(now) {
            entries.remove(&key);
            return None;
        }
        entry.access_count += 1;
        entry.last_accessed = now;
        Some(CachedOutcome {
            payload: entry.payload.clone(),
            cache_hit: true,
            key,
            age_ms: Some((now - entry.created_at).num_milliseconds()),
            access_count: Some(entry.access_count),
        })
    }

    /// Hit path returns the stored payload; miss path runs `compute`, stores
    /// the result, and may persist a snapshot (10% of writes by default).
    /// The map lock is never held across the compute await.
    pub async fn get_or_compute<F, Fut>(
        &self,
        query: &Value,
        compute: F,
    ) -> Result<CachedOutcome, OrchestratorError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, OrchestratorError>>,
    {
        if let Some(hit) = self.get(query) {
            debug!(key = %hit.key, "cache hit");
            return Ok(hit);
        }

        let key = canonical_key(query);
        let payload = compute().await?;
        self.insert(key.clone(), query.clone(), payload.clone());

        if rand::thread_rng().gen_bool(self.config.persist_probability) {
            if let Err(e) = self.flush() {
                warn!("cache snapshot persist failed: {}", e);
            }
        }

        Ok(CachedOutcome {
            payload,
            cache_hit: false,
            key,
            age_ms: None,
            access_count: None,
        })
    }

    /// Insert with eviction under one lock: the map never exceeds capacity.
    fn insert(&self, key: String, source_query: Value, payload: Value) {
        let now = Utc::now();
        let entry = CacheEntry {
            key: key.clone(),
            payload,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            max_age_ms: self.config.max_age_ms,
            features: QueryFeatures::from_query(&source_query),
            source_query,
        };

        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) {
            while entries.len() >= self.config.capacity && !entries.is_empty() {
                evict_lowest_scored(&mut entries, now);
            }
        }
        entries.insert(key, entry);
    }

    /// Write the full map through the snapshot store.
    pub fn flush(&self) -> Result<(), OrchestratorError> {
        let snapshot: Vec<CacheEntry> = {
            let entries = self.entries.lock().unwrap();
            entries.values().cloned().collect()
        };
        self.store.save_snapshot(&snapshot)
    }
}

/// Retention score: raw access count plus recency normalized to [0,1]
/// across the current map. The lowest-scored entry goes first.
fn evict_lowest_scored(entries: &mut HashMap<String, CacheEntry>, now: DateTime<Utc>) {
    let oldest = entries
        .values()
        .map(|e| e.last_accessed)
        .min()
        .unwrap_or(now);
    let span_ms = (now - oldest).num_milliseconds().max(1) as f64;

    let victim = entries
        .values()
        .map(|e| {
            let recency = (e.last_accessed - oldest).num_milliseconds() as f64 / span_ms;
            (e.key.clone(), e.access_count as f64 + recency)
        })
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(key, _)| key);

    if let Some(key) = victim {
        debug!(%key, "evicting lowest-scored cache entry");
        entries.remove(&key);
    }
}
