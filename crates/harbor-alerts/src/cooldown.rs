//! Cooldown tracking for (rule, unit) pairs.
//!
//! A cooldown entry is a key in an expiring key/value store. Entries are
//! never deleted explicitly; they simply stop counting once their TTL has
//! elapsed. The evaluator claims a cooldown with an atomic set-if-absent so
//! two concurrent samples for the same pair cannot both fire.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::{AlertError, Result};

/// An expiring key/value store with an atomic set-if-absent primitive.
///
/// Expiry is computed relative to the `now` passed by the caller so that
/// evaluation time, not wall-clock time at the store, decides suppression.
pub trait ExpiringStore: Send + Sync + std::fmt::Debug {
    /// Sets `key` with the given TTL only if no unexpired entry exists.
    ///
    /// Returns `true` if the key was set.
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// Sets `key` with the given TTL, replacing any existing entry.
    fn set<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Returns the expiry of `key` if it exists and has not expired.
    fn expires_at<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DateTime<Utc>>>> + Send + 'a>>;
}

fn expiry(ttl: Duration, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl).map_err(|e| AlertError::CooldownStore {
        reason: format!("ttl out of range: {e}"),
    })?;
    Ok(now + ttl)
}

/// In-process [`ExpiringStore`] backed by a sharded concurrent map.
///
/// Each key lives in one shard; the entry API holds that shard's lock for
/// the whole check-then-set, which makes `set_if_absent` atomic per key.
#[derive(Debug, Default)]
pub struct MemoryExpiringStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryExpiringStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set_if_absent_sync(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
        let until = expiry(ttl, now)?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    return Ok(false);
                }
                occupied.insert(until);
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(until);
                Ok(true)
            }
        }
    }
}

impl ExpiringStore for MemoryExpiringStore {
    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { self.set_if_absent_sync(key, ttl, now) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let until = expiry(ttl, now)?;
            self.entries.insert(key.to_string(), until);
            Ok(())
        })
    }

    fn expires_at<'a>(
        &'a self,
        key: &'a str,
        now: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DateTime<Utc>>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .entries
                .get(key)
                .map(|until| *until)
                .filter(|until| *until > now))
        })
    }
}

/// Tracks which (rule, unit) pairs are inside their cooldown window.
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    store: Arc<dyn ExpiringStore>,
}

impl CooldownTracker {
    /// Creates a tracker over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn ExpiringStore>) -> Self {
        Self { store }
    }

    /// Creates a tracker over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryExpiringStore::new()))
    }

    /// The store key for a (rule, unit) pair.
    ///
    /// The rule id length is part of the key so ids containing the
    /// separator cannot collide.
    #[must_use]
    pub fn key(rule_id: &str, unit_id: &str) -> String {
        format!("cooldown:{}:{rule_id}:{unit_id}", rule_id.len())
    }

    /// Returns true if the pair is inside an unexpired cooldown at `now`.
    pub async fn is_suppressed(&self, rule_id: &str, unit_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let key = Self::key(rule_id, unit_id);
        Ok(self.store.expires_at(&key, now).await?.is_some())
    }

    /// Returns when the current cooldown for the pair ends, if any.
    pub async fn suppressed_until(
        &self,
        rule_id: &str,
        unit_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let key = Self::key(rule_id, unit_id);
        self.store.expires_at(&key, now).await
    }

    /// Starts (or restarts) a cooldown for the pair.
    pub async fn mark_fired(
        &self,
        rule_id: &str,
        unit_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let key = Self::key(rule_id, unit_id);
        self.store.set(&key, ttl, now).await?;
        debug!(rule_id = %rule_id, unit_id = %unit_id, ttl_secs = ttl.as_secs(), "cooldown started");
        Ok(())
    }

    /// Atomically claims the cooldown for the pair.
    ///
    /// Returns `true` if the caller may fire, `false` if an unexpired
    /// cooldown already exists.
    pub async fn try_fire(
        &self,
        rule_id: &str,
        unit_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let key = Self::key(rule_id, unit_id);
        let claimed = self.store.set_if_absent(&key, ttl, now).await?;
        if claimed {
            debug!(rule_id = %rule_id, unit_id = %unit_id, ttl_secs = ttl.as_secs(), "cooldown claimed");
        }
        Ok(claimed)
    }
}
