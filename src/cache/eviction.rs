//! Eviction policies for the artifact cache.
//!
//! A policy only picks victims; [`ArtifactCache::sweep`](super::ArtifactCache::sweep)
//! does the deleting.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

/// A cached artifact as seen by a sweep.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub accessed: SystemTime,
}

pub trait EvictionPolicy: Send + Sync {
    /// Paths to remove from `entries`.
    fn select(&self, entries: &[CacheEntry], now: SystemTime) -> Vec<PathBuf>;
}

/// Never evict anything.
pub struct KeepAll;

impl EvictionPolicy for KeepAll {
    fn select(&self, _entries: &[CacheEntry], _now: SystemTime) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Evict entries not accessed within the given duration.
pub struct MaxAge(pub Duration);

impl EvictionPolicy for MaxAge {
    fn select(&self, entries: &[CacheEntry], now: SystemTime) -> Vec<PathBuf> {
        entries
            .iter()
            .filter(|e| {
                now.duration_since(e.accessed)
                    .map(|age| age > self.0)
                    .unwrap_or(false)
            })
            .map(|e| e.path.clone())
            .collect()
    }
}

/// Keep the total size under a byte cap, least recently accessed first out.
pub struct MaxTotalBytes(pub u64);

impl EvictionPolicy for MaxTotalBytes {
    fn select(&self, entries: &[CacheEntry], _now: SystemTime) -> Vec<PathBuf> {
        let mut total: u64 = entries.iter().map(|e| e.size).sum();
        if total <= self.0 {
            return Vec::new();
        }

        let mut oldest_first: Vec<&CacheEntry> = entries.iter().collect();
        oldest_first.sort_by_key(|e| e.accessed);

        let mut victims = Vec::new();
        for entry in oldest_first {
            if total <= self.0 {
                break;
            }
            total = total.saturating_sub(entry.size);
            victims.push(entry.path.clone());
        }
        victims
    }
}

/// Apply several policies in order; each sees only what the previous ones kept.
pub struct PolicySet(pub Vec<Box<dyn EvictionPolicy>>);

impl EvictionPolicy for PolicySet {
    fn select(&self, entries: &[CacheEntry], now: SystemTime) -> Vec<PathBuf> {
        let mut remaining: Vec<CacheEntry> = entries.to_vec();
        let mut victims = Vec::new();
        for policy in &self.0 {
            let selected = policy.select(&remaining, now);
            remaining.retain(|e| !selected.contains(&e.path));
            victims.extend(selected);
        }
        victims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, size: u64, secs_ago: u64, now: SystemTime) -> CacheEntry {
        CacheEntry {
            path: PathBuf::from(name),
            size,
            accessed: now - Duration::from_secs(secs_ago),
        }
    }

    #[test]
    fn test_keep_all() {
        let now = SystemTime::now();
        let entries = vec![entry("a.wav", 10, 1_000_000, now)];
        assert!(KeepAll.select(&entries, now).is_empty());
    }

    #[test]
    fn test_max_age() {
        let now = SystemTime::now();
        let entries = vec![
            entry("fresh.wav", 10, 5, now),
            entry("stale.wav", 10, 7200, now),
        ];
        let victims = MaxAge(Duration::from_secs(3600)).select(&entries, now);
        assert_eq!(victims, vec![PathBuf::from("stale.wav")]);
    }

    #[test]
    fn test_max_total_bytes_evicts_least_recent() {
        let now = SystemTime::now();
        let entries = vec![
            entry("new.wav", 100, 1, now),
            entry("oldest.wav", 100, 300, now),
            entry("middle.wav", 100, 200, now),
        ];
        let victims = MaxTotalBytes(150).select(&entries, now);
        assert_eq!(
            victims,
            vec![PathBuf::from("oldest.wav"), PathBuf::from("middle.wav")]
        );
    }

    #[test]
    fn test_max_total_bytes_under_cap() {
        let now = SystemTime::now();
        let entries = vec![entry("a.wav", 100, 1, now)];
        assert!(MaxTotalBytes(100).select(&entries, now).is_empty());
    }

    #[test]
    fn test_policy_set_does_not_double_count() {
        let now = SystemTime::now();
        let entries = vec![
            entry("stale.wav", 100, 7200, now),
            entry("old.wav", 100, 600, now),
            entry("new.wav", 100, 1, now),
        ];
        let policy = PolicySet(vec![
            Box::new(MaxAge(Duration::from_secs(3600))),
            Box::new(MaxTotalBytes(100)),
        ]);
        let victims = policy.select(&entries, now);
        assert_eq!(
            victims,
            vec![PathBuf::from("stale.wav"), PathBuf::from("old.wav")]
        );
    }
}
