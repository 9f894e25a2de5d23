//! # Worker Availability Cache
//!
//! Tracks the last heartbeat of every worker instance, grouped by worker type.
//! A worker type is alive while at least one of its instances sent a
//! heartbeat within the configured TTL.
//!
//! Reads never block on a refresh: a stale "not alive" answer only defers
//! dispatch to a later pass.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, info};

use crate::messaging::WorkerHeartBeatEvent;

/// Read side of the cache, injected into the dispatcher
pub trait WorkerAvailability: Send + Sync {
    fn is_alive(&self, worker_type: &str) -> bool;

    /// Every worker type currently alive, sorted
    fn alive_worker_types(&self) -> Vec<String>;
}

#[derive(Debug)]
pub struct WorkerCache {
    /// worker_type -> worker_id -> last heartbeat
    workers: DashMap<String, HashMap<String, DateTime<Utc>>>,
    ttl: chrono::Duration,
}

impl WorkerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            workers: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl)
                .unwrap_or_else(|_| chrono::Duration::days(36_500)),
        }
    }

    fn is_alive_at(&self, worker_type: &str, now: DateTime<Utc>) -> bool {
        self.workers.get(worker_type).is_some_and(|instances| {
            instances
                .values()
                .any(|last_seen| now.signed_duration_since(*last_seen) <= self.ttl)
        })
    }

    /// Record one heartbeat. Returns `true` when its worker type was not
    /// alive before.
    pub fn register_heartbeat(&self, event: &WorkerHeartBeatEvent) -> bool {
        let now = Utc::now();
        let was_alive = self.is_alive_at(&event.worker_type, now);

        let mut instances = self.workers.entry(event.worker_type.clone()).or_default();
        let last_seen = instances
            .entry(event.worker_id.clone())
            .or_insert(event.heartbeat_date);
        // Heartbeats may arrive out of order.
        if event.heartbeat_date > *last_seen {
            *last_seen = event.heartbeat_date;
        }
        drop(instances);

        let became_alive = !was_alive && self.is_alive_at(&event.worker_type, now);
        if became_alive {
            info!(
                worker_type = %event.worker_type,
                worker_id = %event.worker_id,
                "Worker type is now available"
            );
        }
        became_alive
    }

    /// Record a batch of heartbeats and return the worker types that became
    /// alive, without duplicates.
    pub fn register_heartbeats(&self, events: &[WorkerHeartBeatEvent]) -> Vec<String> {
        let mut revived = BTreeSet::new();
        for event in events {
            if self.register_heartbeat(event) {
                revived.insert(event.worker_type.clone());
            }
        }
        debug!(
            heartbeats = events.len(),
            revived = revived.len(),
            "Registered worker heartbeats"
        );
        revived.into_iter().collect()
    }

    /// Drop instances whose last heartbeat is older than the TTL. Returns the
    /// number of instances removed.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        for mut entry in self.workers.iter_mut() {
            let before = entry.len();
            entry.retain(|_, last_seen| now.signed_duration_since(*last_seen) <= self.ttl);
            removed += before - entry.len();
        }
        self.workers.retain(|_, instances| !instances.is_empty());
        removed
    }

    /// Identifiers of the live instances of a worker type, sorted
    pub fn worker_ids(&self, worker_type: &str) -> Vec<String> {
        let now = Utc::now();
        let mut ids: Vec<String> = self
            .workers
            .get(worker_type)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|(_, last_seen)| now.signed_duration_since(**last_seen) <= self.ttl)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

impl WorkerAvailability for WorkerCache {
    fn is_alive(&self, worker_type: &str) -> bool {
        self.is_alive_at(worker_type, Utc::now())
    }

    fn alive_worker_types(&self) -> Vec<String> {
        let now = Utc::now();
        let known: Vec<String> = self.workers.iter().map(|entry| entry.key().clone()).collect();
        let mut types: Vec<String> = known
            .into_iter()
            .filter(|worker_type| self.is_alive_at(worker_type, now))
            .collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(worker_id: &str, worker_type: &str, age_secs: i64) -> WorkerHeartBeatEvent {
        WorkerHeartBeatEvent {
            worker_id: worker_id.to_string(),
            worker_type: worker_type.to_string(),
            heartbeat_date: Utc::now() - chrono::Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_first_heartbeat_revives_worker_type() {
        let cache = WorkerCache::new(Duration::from_secs(30));
        assert!(!cache.is_alive("w1"));
        assert!(cache.register_heartbeat(&heartbeat("a", "w1", 0)));
        assert!(cache.is_alive("w1"));
        // Second instance of an already alive type is not a revival.
        assert!(!cache.register_heartbeat(&heartbeat("b", "w1", 0)));
        assert_eq!(cache.worker_ids("w1"), vec!["a", "b"]);
    }

    #[test]
    fn test_stale_heartbeat_does_not_make_alive() {
        let cache = WorkerCache::new(Duration::from_secs(30));
        assert!(!cache.register_heartbeat(&heartbeat("a", "w1", 120)));
        assert!(!cache.is_alive("w1"));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.alive_worker_types().is_empty());
    }

    #[test]
    fn test_out_of_order_heartbeat_keeps_latest() {
        let cache = WorkerCache::new(Duration::from_secs(30));
        cache.register_heartbeat(&heartbeat("a", "w1", 0));
        cache.register_heartbeat(&heartbeat("a", "w1", 120));
        assert!(cache.is_alive("w1"));
    }

    #[test]
    fn test_batch_reports_each_revived_type_once() {
        let cache = WorkerCache::new(Duration::from_secs(30));
        let revived = cache.register_heartbeats(&[
            heartbeat("a", "w2", 0),
            heartbeat("b", "w2", 0),
            heartbeat("c", "w1", 0),
        ]);
        assert_eq!(revived, vec!["w1", "w2"]);
        assert_eq!(cache.alive_worker_types(), vec!["w1", "w2"]);
    }
}
