//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every session of a coordinator
#[derive(Debug, Default)]
pub struct CacheStats {
    session_hits: AtomicU64,
    shared_hits: AtomicU64,
    fetches: AtomicU64,
    not_found: AtomicU64,
    promotions: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Queries answered by the session tier
    pub session_hits: u64,
    /// Queries answered by the shared tier
    pub shared_hits: u64,
    /// Calls made to the persistence collaborator
    pub fetches: u64,
    /// Collaborator calls that found nothing
    pub not_found: u64,
    /// Entries merged into shared caches
    pub promotions: u64,
    /// Entries evicted from shared caches
    pub evictions: u64,
    /// Session caches cleared by writes or resets
    pub invalidations: u64,
    /// (session_hits + shared_hits) / all queries
    pub hit_ratio: f64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session-tier hit
    pub fn record_session_hit(&self) {
        self.session_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a shared-tier hit
    pub fn record_shared_hit(&self) {
        self.shared_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a collaborator fetch
    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a collaborator miss
    pub fn record_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    /// Record entries merged into a shared cache
    pub fn record_promotions(&self, n: u64) {
        self.promotions.fetch_add(n, Ordering::Relaxed);
    }

    /// Record shared-tier evictions
    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    /// Record a session cache being cleared
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get session-tier hits
    pub fn session_hits(&self) -> u64 {
        self.session_hits.load(Ordering::Relaxed)
    }

    /// Get shared-tier hits
    pub fn shared_hits(&self) -> u64 {
        self.shared_hits.load(Ordering::Relaxed)
    }

    /// Get collaborator fetches
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Get collaborator misses
    pub fn not_found(&self) -> u64 {
        self.not_found.load(Ordering::Relaxed)
    }

    /// Get promoted entries
    pub fn promotions(&self) -> u64 {
        self.promotions.load(Ordering::Relaxed)
    }

    /// Get shared-tier evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get session invalidations
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio across both tiers (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.session_hits() + self.shared_hits();
        let total = hits + self.fetches();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            session_hits: self.session_hits(),
            shared_hits: self.shared_hits(),
            fetches: self.fetches(),
            not_found: self.not_found(),
            promotions: self.promotions(),
            evictions: self.evictions(),
            invalidations: self.invalidations(),
            hit_ratio: self.hit_ratio(),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.session_hits,
            &self.shared_hits,
            &self.fetches,
            &self.not_found,
            &self.promotions,
            &self.evictions,
            &self.invalidations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
