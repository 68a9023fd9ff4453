//! Short-lived read cache for period totals.
//!
//! Entries are keyed by the exact entity set and the hour bucket they were
//! computed in, and expire after a TTL shorter than one ingestion cycle.
//! The write path never reads from here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::Connection;

use super::aggregate::{PeriodTotals, TotalsEntity, TotalsQuery};
use crate::error::TrackingError;
use crate::ledger::hour_bucket;

/// Totals per entity, shared between readers.
pub type TotalsMap = Arc<BTreeMap<TotalsEntity, PeriodTotals>>;

/// Cache key: the entity set plus the hour the totals were computed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entities: BTreeSet<TotalsEntity>,
    pub hour_bucket: DateTime<Utc>,
}

impl CacheKey {
    pub fn new(entities: impl IntoIterator<Item = TotalsEntity>, now: DateTime<Utc>) -> Self {
        Self {
            entities: entities.into_iter().collect(),
            hour_bucket: hour_bucket(now),
        }
    }
}

/// Injected cache interface.
pub trait TotalsCache: Send + Sync {
    /// A fresh entry, if any.
    fn get(&self, key: &CacheKey) -> Option<TotalsMap>;

    /// Store computed totals. Concurrent puts simply overwrite.
    fn put(&self, key: CacheKey, value: TotalsMap);

    /// Drop every entry that covers the entity.
    fn invalidate_entity(&self, entity: &TotalsEntity);
}

struct CachedTotals {
    value: TotalsMap,
    stored_at: Instant,
}

/// Process-local cache backed by a concurrent map.
pub struct InMemoryTotalsCache {
    entries: DashMap<CacheKey, CachedTotals>,
    ttl: Duration,
}

impl InMemoryTotalsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Number of stored entries, expired ones not yet purged included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, cached| cached.stored_at.elapsed() < ttl);
    }
}

impl TotalsCache for InMemoryTotalsCache {
    fn get(&self, key: &CacheKey) -> Option<TotalsMap> {
        let ttl = self.ttl;
        if let Some(cached) = self.entries.get(key) {
            if cached.stored_at.elapsed() < ttl {
                return Some(Arc::clone(&cached.value));
            }
        } else {
            return None;
        }
        // The shard guard is released here; remove only if still stale
        self.entries
            .remove_if(key, |_, cached| cached.stored_at.elapsed() >= ttl);
        None
    }

    fn put(&self, key: CacheKey, value: TotalsMap) {
        self.purge_expired();
        self.entries.insert(
            key,
            CachedTotals {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    fn invalidate_entity(&self, entity: &TotalsEntity) {
        self.entries.retain(|key, _| !key.entities.contains(entity));
    }
}

/// Reader facade: consult the cache, compute on miss.
#[derive(Clone)]
pub struct TotalsReader {
    cache: Arc<dyn TotalsCache>,
}

impl TotalsReader {
    pub fn new(cache: Arc<dyn TotalsCache>) -> Self {
        Self { cache }
    }

    /// Period totals for a set of entities as of `now`.
    pub fn totals(
        &self,
        conn: &Connection,
        entities: &[TotalsEntity],
        now: DateTime<Utc>,
    ) -> Result<TotalsMap, TrackingError> {
        let key = CacheKey::new(entities.iter().copied(), now);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let query = TotalsQuery::new(conn);
        let mut computed = BTreeMap::new();
        for entity in &key.entities {
            computed.insert(*entity, query.period_totals(*entity, now)?);
        }

        let value = Arc::new(computed);
        self.cache.put(key, Arc::clone(&value));
        Ok(value)
    }

    /// The cache behind this reader.
    pub fn cache(&self) -> &Arc<dyn TotalsCache> {
        &self.cache
    }
}
