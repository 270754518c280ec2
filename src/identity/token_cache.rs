//! Validated-token cache.
//!
//! Entries are keyed by the SHA-256 hex digest of the raw bearer token, never
//! the token itself, so a dump of the cache cannot be replayed. Each entry
//! lives until `min(token exp, inserted_at + ttl)`.
//!
//! Expired entries are purged opportunistically on insert, under the same
//! lock, so there is no background sweeper to contend with.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::user::User;

/// A validated user and the wall-clock instant it stops being served.
#[derive(Debug, Clone)]
struct CachedToken {
    user: User,
    expires_at: SystemTime,
}

impl CachedToken {
    fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe token cache with TTL expiry.
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TokenCache {
    /// Create an empty cache whose entries live at most `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache key for a raw token: lowercase hex SHA-256.
    #[must_use]
    pub fn key_for(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Return the cached user for `token` if present and unexpired.
    pub fn get(&self, token: &str) -> Option<User> {
        let key = Self::key_for(token);
        let now = SystemTime::now();
        let mut entries = self.entries.lock();

        match entries.get(&key) {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.user.clone())
            }
            Some(_) => {
                entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache `user` for `token`, bounded by the token's own expiry.
    ///
    /// Nothing is stored if the entry would already be expired (a token inside
    /// its clock-skew grace window).
    pub fn insert(&self, token: &str, user: User, token_expires_at: SystemTime) {
        let now = SystemTime::now();
        let expires_at = match now.checked_add(self.ttl) {
            Some(cap) => token_expires_at.min(cap),
            None => token_expires_at,
        };
        let key = Self::key_for(token);

        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - entries.len();
        if purged > 0 {
            self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        }

        if expires_at > now {
            entries.insert(key, CachedToken { user, expires_at });
        }
    }

    /// Drop every entry. Only costs re-validation work.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Current number of entries, expired ones included until purged.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of the cache counters.
    #[must_use]
    pub fn stats(&self) -> TokenCacheStats {
        TokenCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

/// Snapshot of token cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TokenCacheStats {
    /// Lookups served from cache
    pub hits: u64,
    /// Lookups that missed or found an expired entry
    pub misses: u64,
    /// Expired entries removed
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserRole;

    fn far_future() -> SystemTime {
        SystemTime::now() + Duration::from_secs(3600)
    }

    #[test]
    fn key_is_sha256_hex_not_plaintext() {
        let key = TokenCache::key_for("secret-token");
        assert_eq!(key.len(), 64);
        assert!(!key.contains("secret"));
        assert_eq!(key, TokenCache::key_for("secret-token"));
    }

    #[test]
    fn hit_after_insert() {
        let cache = TokenCache::new(Duration::from_secs(300));
        let user = User::new("u-1", UserRole::Admin);

        cache.insert("tok", user.clone(), far_future());

        assert_eq!(cache.get("tok"), Some(user));
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn huge_ttl_falls_back_to_token_expiry() {
        // GIVEN: a TTL too large to add to the current time
        let cache = TokenCache::new(Duration::from_secs(u64::MAX));

        // WHEN: a token is cached
        cache.insert("tok", User::new("u-1", UserRole::OpsRw), far_future());

        // THEN: the token's own expiry bounds the entry
        assert!(cache.get("tok").is_some());
    }

    #[test]
    fn miss_on_unknown_token() {
        let cache = TokenCache::new(Duration::from_secs(300));
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn ttl_bounds_entry_lifetime() {
        // GIVEN: a 5ms cache TTL and a token valid for an hour
        let cache = TokenCache::new(Duration::from_millis(5));
        cache.insert("tok", User::new("u-1", UserRole::ReadOnly), far_future());

        // WHEN: the TTL passes
        std::thread::sleep(Duration::from_millis(15));

        // THEN: the entry is gone
        assert_eq!(cache.get("tok"), None);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn token_expiry_bounds_entry_lifetime() {
        // GIVEN: a long TTL but a token expiring in 5ms
        let cache = TokenCache::new(Duration::from_secs(300));
        let exp = SystemTime::now() + Duration::from_millis(5);
        cache.insert("tok", User::new("u-1", UserRole::ReadOnly), exp);

        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(cache.get("tok"), None);
    }

    #[test]
    fn already_expired_token_is_not_stored() {
        let cache = TokenCache::new(Duration::from_secs(300));
        let exp = SystemTime::now() - Duration::from_secs(10);
        cache.insert("tok", User::new("u-1", UserRole::ReadOnly), exp);
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_purges_expired_entries() {
        // GIVEN: one short-lived entry
        let cache = TokenCache::new(Duration::from_secs(300));
        let soon = SystemTime::now() + Duration::from_millis(5);
        cache.insert("short", User::new("a", UserRole::ReadOnly), soon);
        std::thread::sleep(Duration::from_millis(15));

        // WHEN: another token is inserted
        cache.insert("long", User::new("b", UserRole::ReadOnly), far_future());

        // THEN: the expired one was swept under the insert lock
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn clear_empties_cache() {
        let cache = TokenCache::new(Duration::from_secs(300));
        cache.insert("a", User::new("a", UserRole::ReadOnly), far_future());
        cache.insert("b", User::new("b", UserRole::ReadOnly), far_future());
        assert_eq!(cache.len(), 2);

        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }
}
