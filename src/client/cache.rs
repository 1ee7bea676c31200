//! In-memory response cache.
//!
//! Keyed by the SHA-256 of prompt context, content and language pair, so a
//! re-sent batch (after a crash, or an identical paragraph in another file)
//! is answered without a provider call. Entries expire after the TTL;
//! capacity is bounded by LRU eviction.

use crate::pipeline::sha256_hex;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    text: String,
    inserted: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_CAPACITY: usize = 1024;

pub fn cache_key(prompt_context: &str, content: &str, source: &str, target: &str) -> String {
    sha256_hex(format!("{prompt_context}:{content}:{source}:{target}"))
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() <= self.ttl => return Some(entry.text.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: String, text: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key,
            CacheEntry {
                text,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_every_part() {
        let base = cache_key("ctx", "Hello", "English", "French");
        assert_eq!(base, cache_key("ctx", "Hello", "English", "French"));
        assert_ne!(base, cache_key("other", "Hello", "English", "French"));
        assert_ne!(base, cache_key("ctx", "Hello", "English", "German"));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn hit_then_expiry() {
        let cache = ResponseCache::new(4, Duration::from_millis(20));
        cache.insert("k".into(), "v".into());
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_evicts_least_recent() {
        let cache = ResponseCache::new(2, DEFAULT_TTL);
        cache.insert("a".into(), "1".into());
        cache.insert("b".into(), "2".into());
        cache.get("a");
        cache.insert("c".into(), "3".into());
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.len(), 2);
    }
}
