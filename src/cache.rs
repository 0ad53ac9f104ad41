// MIT License - Copyright (c) 2026 Peter Wright

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::installation::InstallationServices;

/// Diagnostics snapshot of the cache contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    pub size: usize,
    pub ttl_secs: u64,
    pub keys: Vec<String>,
}

struct CacheEntry {
    services: InstallationServices,
    stored_at: i64,
}

/// TTL-keyed cache of installation services metadata.
///
/// Entries are valid while `now - stored_at <= ttl`. The TTL is evaluated
/// at read time against the stored timestamp, so `set_ttl` applies
/// retroactively to entries already in the cache. Eviction is lazy: an
/// expired entry is removed by the `get` that observes it; there is no
/// background sweeper.
///
/// Not synchronized. The owning client serializes access; the cache itself
/// must not be mutated from multiple tasks without an external lock.
pub struct ServiceCache {
    entries: HashMap<String, CacheEntry>,
    ttl_secs: u64,
}

impl ServiceCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_secs,
        }
    }

    /// Look up a valid entry, evicting it if its age exceeds the TTL.
    pub fn get(&mut self, installation_id: &str) -> Option<InstallationServices> {
        self.get_at(installation_id, Utc::now().timestamp())
    }

    /// `get` against an explicit clock.
    pub fn get_at(&mut self, installation_id: &str, now: i64) -> Option<InstallationServices> {
        let expired = match self.entries.get(installation_id) {
            None => return None,
            Some(entry) => now - entry.stored_at > self.ttl_secs as i64,
        };
        if expired {
            debug!("Cache entry for installation {installation_id} expired");
            self.entries.remove(installation_id);
            return None;
        }
        self.entries
            .get(installation_id)
            .map(|e| e.services.clone())
    }

    /// Store services for an installation. Latest write wins.
    pub fn set(&mut self, installation_id: &str, services: InstallationServices) {
        self.set_at(installation_id, services, Utc::now().timestamp());
    }

    /// `set` against an explicit clock.
    pub fn set_at(&mut self, installation_id: &str, services: InstallationServices, now: i64) {
        self.entries.insert(
            installation_id.to_string(),
            CacheEntry {
                services,
                stored_at: now,
            },
        );
        debug!("Cached services for installation {installation_id}");
    }

    /// Drop one entry, or everything when `installation_id` is `None`.
    pub fn clear(&mut self, installation_id: Option<&str>) {
        match installation_id {
            Some(id) => {
                self.entries.remove(id);
                debug!("Cleared services cache for installation {id}");
            }
            None => {
                self.entries.clear();
                debug!("Cleared all services cache");
            }
        }
    }

    /// Change the TTL. Applies to all future reads, including entries
    /// stored before the call.
    pub fn set_ttl(&mut self, ttl_secs: u64) {
        self.ttl_secs = ttl_secs;
        debug!("Cache TTL set to {ttl_secs}s");
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Diagnostics snapshot. Never fails; an empty cache yields empty info.
    pub fn info(&self) -> CacheInfo {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        CacheInfo {
            size: self.entries.len(),
            ttl_secs: self.ttl_secs,
            keys,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installation::InstallationServices;

    fn services(panel: &str, capabilities: &str) -> InstallationServices {
        InstallationServices {
            numinst: "1234567".to_string(),
            alias: "Home".to_string(),
            status: "E".to_string(),
            panel: panel.to_string(),
            capabilities: capabilities.to_string(),
            language: "es".to_string(),
            services: Vec::new(),
        }
    }

    #[test]
    fn test_get_within_ttl() {
        let mut cache = ServiceCache::new(60);
        cache.set_at("A", services("PROTOCOL", "caps"), 1000);

        let hit = cache.get_at("A", 1060).expect("entry still valid at exactly ttl");
        assert_eq!(hit.panel, "PROTOCOL");
        assert_eq!(hit.capabilities, "caps");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let mut cache = ServiceCache::new(60);
        cache.set_at("A", services("PROTOCOL", "caps"), 1000);

        assert!(cache.get_at("A", 1061).is_none());
        assert_eq!(cache.len(), 0, "expired entry must be removed on read");
    }

    #[test]
    fn test_absent_key() {
        let mut cache = ServiceCache::new(60);
        assert!(cache.get_at("missing", 0).is_none());
    }

    #[test]
    fn test_latest_write_wins() {
        let mut cache = ServiceCache::new(60);
        cache.set_at("A", services("OLD", "caps1"), 1000);
        cache.set_at("A", services("NEW", "caps2"), 1010);

        let hit = cache.get_at("A", 1020).unwrap();
        assert_eq!(hit.panel, "NEW");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_set_ttl_is_retroactive() {
        let mut cache = ServiceCache::new(60);
        cache.set_at("A", services("PROTOCOL", "caps"), 1000);

        // Entry is 100s old: expired under the original TTL...
        assert_eq!(cache.ttl_secs(), 60);
        cache.set_ttl(300);
        // ...but the new TTL applies to the already-stored timestamp.
        assert!(cache.get_at("A", 1100).is_some());

        cache.set_ttl(30);
        assert!(cache.get_at("A", 1100).is_none());
    }

    #[test]
    fn test_clear_single_and_all() {
        let mut cache = ServiceCache::new(60);
        cache.set_at("A", services("P1", "c1"), 1000);
        cache.set_at("B", services("P2", "c2"), 1000);

        cache.clear(Some("A"));
        assert!(cache.get_at("A", 1001).is_none());
        assert!(cache.get_at("B", 1001).is_some());

        cache.clear(None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear_unknown_key_is_noop() {
        let mut cache = ServiceCache::new(60);
        cache.set_at("A", services("P1", "c1"), 1000);
        cache.clear(Some("Z"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_info_snapshot() {
        let mut cache = ServiceCache::new(120);
        cache.set_at("B", services("P2", "c2"), 1000);
        cache.set_at("A", services("P1", "c1"), 1000);

        let info = cache.info();
        assert_eq!(info.size, 2);
        assert_eq!(info.ttl_secs, 120);
        assert_eq!(info.keys, vec!["A".to_string(), "B".to_string()]);
    }
}
