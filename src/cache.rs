use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::models::users::User;
use crate::utils::clock::Clock;

/// A user snapshot and the moment it was read from the backend.
#[derive(Clone, Debug)]
pub struct CachedProfile {
    pub user: User,
    pub fetched_at: DateTime<Utc>,
}

/// Short-lived read cache for user records. Never authoritative: entries
/// older than the TTL read as misses, and every balance write invalidates
/// the user's entry.
///
/// A backend read that races a write must not repopulate the cache with the
/// pre-write snapshot. Readers take a [`ProfileCache::generation`] before
/// reading and hand it to [`ProfileCache::put_fresh`], which drops the
/// snapshot if any invalidation happened in between.
#[derive(Clone)]
pub struct ProfileCache {
    entries: Arc<DashMap<String, CachedProfile>>,
    invalidations: Arc<AtomicU64>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ProfileCache {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            invalidations: Arc::new(AtomicU64::new(0)),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::MAX),
            clock,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<User> {
        let now = self.clock.now();
        let fresh = {
            let entry = self.entries.get(user_id)?;
            if now - entry.fetched_at < self.ttl {
                Some(entry.user.clone())
            } else {
                None
            }
        };

        if fresh.is_none() {
            // Only drop the entry if nobody refreshed it in the meantime.
            self.entries
                .remove_if(user_id, |_, entry| now - entry.fetched_at >= self.ttl);
        }

        fresh
    }

    pub fn put(&self, user: User) {
        let fetched_at = self.clock.now();
        self.entries
            .insert(user.id.clone(), CachedProfile { user, fetched_at });
    }

    pub fn generation(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Caches a snapshot read after `generation` was taken, unless an
    /// invalidation has happened since. Returns whether it was kept.
    pub fn put_fresh(&self, user: User, generation: u64) -> bool {
        if self.generation() != generation {
            return false;
        }
        let user_id = user.id.clone();
        self.put(user);

        // An invalidation between the check and the insert may have run its
        // remove before our insert landed.
        if self.generation() != generation {
            self.entries.remove(&user_id);
            return false;
        }
        true
    }

    pub fn invalidate(&self, user_id: &str) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(user_id);
    }

    pub fn invalidate_all(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::Visibility;
    use crate::utils::clock::ManualClock;
    use chrono::TimeZone;

    fn user(id: &str, credits: i64) -> User {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        User {
            id: id.to_string(),
            email: format!("{}@campus.edu", id),
            username: id.to_string(),
            credits,
            lifetime_credits: credits,
            login_streak: 1,
            last_login_date: Some(now.date_naive()),
            verified: false,
            referral_code: format!("CODE{}", id),
            push_token: None,
            push_enabled: true,
            visibility: Visibility::Public,
            created_at: now,
            updated_at: now,
        }
    }

    fn cache() -> (ProfileCache, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap());
        let cache = ProfileCache::new(std::time::Duration::from_secs(300), Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn hit_within_ttl() {
        let (cache, clock) = cache();
        cache.put(user("u1", 120));
        clock.advance(Duration::seconds(299));

        assert_eq!(cache.get("u1").map(|u| u.credits), Some(120));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let (cache, clock) = cache();
        cache.put(user("u1", 120));
        clock.advance(Duration::seconds(300));

        assert!(cache.get("u1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn put_refreshes_the_timestamp() {
        let (cache, clock) = cache();
        cache.put(user("u1", 120));
        clock.advance(Duration::seconds(200));
        cache.put(user("u1", 125));
        clock.advance(Duration::seconds(200));

        assert_eq!(cache.get("u1").map(|u| u.credits), Some(125));
    }

    #[test]
    fn invalidation() {
        let (cache, _) = cache();
        cache.put(user("u1", 120));
        cache.put(user("u2", 120));

        cache.invalidate("u1");
        assert!(cache.get("u1").is_none());
        assert!(cache.get("u2").is_some());

        cache.invalidate_all();
        assert!(cache.get("u2").is_none());
    }

    #[test]
    fn snapshot_read_before_a_write_is_not_cached() {
        let (cache, _) = cache();

        // Reader misses and starts a backend read.
        let generation = cache.generation();
        let snapshot = user("u1", 120);

        // A spend commits and invalidates while the read is in flight.
        cache.invalidate("u1");

        assert!(!cache.put_fresh(snapshot, generation));
        assert!(cache.get("u1").is_none());

        let generation = cache.generation();
        assert!(cache.put_fresh(user("u1", 100), generation));
        assert_eq!(cache.get("u1").map(|u| u.credits), Some(100));
    }
}
