use std::time::{Duration, Instant};

use dashmap::DashMap;

const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    permissions: Vec<String>,
    inserted_at: Instant,
}

/// Caches a user's effective permission set within an org so the hot path
/// (checking whether a request is allowed) doesn't hit the database on
/// every request. Entries expire after a TTL and can also be invalidated
/// eagerly when a role assignment changes.
pub struct PermissionCache {
    entries: DashMap<(String, String), CacheEntry>,
    ttl: Duration,
}

impl PermissionCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ttl: DEFAULT_TTL,
        }
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached permission set for `(org_id, user_id)` if present
    /// and not expired.
    #[must_use]
    pub fn get(&self, org_id: &str, user_id: &str) -> Option<Vec<String>> {
        let key = (org_id.to_string(), user_id.to_string());
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.permissions.clone())
    }

    pub fn insert(&self, org_id: &str, user_id: &str, permissions: Vec<String>) {
        self.entries.insert(
            (org_id.to_string(), user_id.to_string()),
            CacheEntry {
                permissions,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Invalidates one user's cached permissions, e.g. after a role change.
    pub fn invalidate(&self, org_id: &str, user_id: &str) {
        self.entries
            .remove(&(org_id.to_string(), user_id.to_string()));
    }

    /// Invalidates every cached entry for an org, e.g. after a role's
    /// permission set itself changes (affecting every member with that role).
    pub fn invalidate_org(&self, org_id: &str) {
        self.entries.retain(|(entry_org, _), _| entry_org != org_id);
    }

    /// `true` if the cached (or freshly-fetched, by the caller) permission
    /// set contains `permission`.
    #[must_use]
    pub fn has(permissions: &[String], permission: &str) -> bool {
        permissions.iter().any(|p| p == permission)
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let cache = PermissionCache::new();
        cache.insert("org1", "user1", vec!["messages.read".to_string()]);
        let perms = cache.get("org1", "user1").expect("present");
        assert_eq!(perms, vec!["messages.read".to_string()]);
    }

    #[test]
    fn expires_after_ttl() {
        let cache = PermissionCache::with_ttl(Duration::from_millis(1));
        cache.insert("org1", "user1", vec!["messages.read".to_string()]);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("org1", "user1").is_none());
    }

    #[test]
    fn invalidate_org_clears_only_that_org() {
        let cache = PermissionCache::new();
        cache.insert("org1", "user1", vec!["a".to_string()]);
        cache.insert("org2", "user1", vec!["b".to_string()]);
        cache.invalidate_org("org1");
        assert!(cache.get("org1", "user1").is_none());
        assert!(cache.get("org2", "user1").is_some());
    }

    #[test]
    fn cross_tenant_lookup_never_returns_other_orgs_permissions() {
        let cache = PermissionCache::new();
        cache.insert("org1", "user1", vec!["admin".to_string()]);
        assert!(cache.get("org2", "user1").is_none());
    }
}
