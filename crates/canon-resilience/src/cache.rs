use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use canon_core::{replace_file_atomic, unix_millis};

use crate::outcome::ChatOutcome;

type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

const DEFAULT_TTL_MS: u64 = 3_600_000;

/// Stable fingerprint for a request: sha256 of the normalized message.
pub fn request_fingerprint(message: &str) -> String {
    let normalized = message.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    stored_at_unix_ms: u64,
    outcome: ChatOutcome,
}

/// TTL cache of successful responses, injected into the fallback chain
/// rather than held as a module-level singleton.
///
/// Entries live in memory; an optional spill directory persists them across
/// restarts with atomic writes.
pub struct ResponseCache {
    ttl_ms: u64,
    entries: Mutex<HashMap<String, CacheEntry>>,
    spill_dir: Option<PathBuf>,
    clock: ClockFn,
}

impl ResponseCache {
    pub fn new(ttl_ms: u64, spill_dir: Option<PathBuf>) -> Self {
        Self::with_clock(ttl_ms, spill_dir, Arc::new(unix_millis))
    }

    pub fn with_default_ttl() -> Self {
        Self::new(DEFAULT_TTL_MS, None)
    }

    pub fn with_clock(ttl_ms: u64, spill_dir: Option<PathBuf>, clock: ClockFn) -> Self {
        Self {
            ttl_ms: ttl_ms.max(1),
            entries: Mutex::new(HashMap::new()),
            spill_dir,
            clock,
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<ChatOutcome> {
        let now = (self.clock)();
        {
            let mut entries = self.lock_entries();
            if let Some(entry) = entries.get(fingerprint) {
                if !self.expired(entry, now) {
                    return Some(entry.outcome.clone());
                }
                entries.remove(fingerprint);
            }
        }
        self.load_spilled(fingerprint, now)
    }

    pub fn put(&self, fingerprint: &str, outcome: &ChatOutcome) {
        let entry = CacheEntry {
            stored_at_unix_ms: (self.clock)(),
            outcome: outcome.clone(),
        };
        if let Some(dir) = &self.spill_dir {
            let path = dir.join(format!("{fingerprint}.json"));
            match serde_json::to_string(&entry) {
                Ok(serialized) => {
                    if let Err(error) = replace_file_atomic(&path, &serialized) {
                        tracing::warn!(%error, "failed to spill cache entry");
                    }
                }
                Err(error) => tracing::warn!(%error, "failed to serialize cache entry"),
            }
        }
        self.lock_entries().insert(fingerprint.to_string(), entry);
    }

    /// Drops expired entries from memory and the spill directory.
    pub fn purge_expired(&self) {
        let now = (self.clock)();
        self.lock_entries().retain(|_, entry| !self.expired(entry, now));

        let Some(dir) = &self.spill_dir else {
            return;
        };
        let Ok(listing) = std::fs::read_dir(dir) else {
            return;
        };
        for file in listing.flatten() {
            let path = file.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let stale = std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
                .map(|entry| self.expired(&entry, now))
                // Unreadable entries are dropped too.
                .unwrap_or(true);
            if stale {
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    fn expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.stored_at_unix_ms) >= self.ttl_ms
    }

    fn load_spilled(&self, fingerprint: &str, now: u64) -> Option<ChatOutcome> {
        let dir = self.spill_dir.as_ref()?;
        let path = dir.join(format!("{fingerprint}.json"));
        let raw = std::fs::read_to_string(&path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        if self.expired(&entry, now) {
            let _ = std::fs::remove_file(&path);
            return None;
        }
        let outcome = entry.outcome.clone();
        self.lock_entries().insert(fingerprint.to_string(), entry);
        Some(outcome)
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::outcome::{ChatUsage, ResponseSource};

    fn outcome(text: &str) -> ChatOutcome {
        ChatOutcome::new(text, "session-1", ChatUsage::default(), ResponseSource::Conversation)
    }

    fn cache_with_manual_clock(ttl_ms: u64, spill_dir: Option<PathBuf>) -> (ResponseCache, Arc<AtomicU64>) {
        let now = Arc::new(AtomicU64::new(5_000_000));
        let clock_now = now.clone();
        let cache = ResponseCache::with_clock(
            ttl_ms,
            spill_dir,
            Arc::new(move || clock_now.load(Ordering::Relaxed)),
        );
        (cache, now)
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        assert_eq!(
            request_fingerprint("  What Is The Vacation Policy? "),
            request_fingerprint("what is the vacation policy?")
        );
        assert_ne!(
            request_fingerprint("vacation policy"),
            request_fingerprint("expense policy")
        );
    }

    #[test]
    fn entries_expire_after_ttl() {
        let (cache, now) = cache_with_manual_clock(1_000, None);
        let key = request_fingerprint("hello");
        cache.put(&key, &outcome("cached answer"));
        assert!(cache.get(&key).is_some());

        now.fetch_add(1_000, Ordering::Relaxed);
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn purge_expired_is_explicit_and_keeps_fresh_entries() {
        let (cache, now) = cache_with_manual_clock(1_000, None);
        let old_key = request_fingerprint("old");
        cache.put(&old_key, &outcome("old"));
        now.fetch_add(900, Ordering::Relaxed);
        let new_key = request_fingerprint("new");
        cache.put(&new_key, &outcome("new"));

        now.fetch_add(100, Ordering::Relaxed);
        cache.purge_expired();
        assert!(cache.get(&old_key).is_none());
        assert!(cache.get(&new_key).is_some());
    }

    #[test]
    fn spilled_entries_survive_a_new_cache_instance() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let dir = tempdir.path().to_path_buf();
        let (cache, _) = cache_with_manual_clock(60_000, Some(dir.clone()));
        let key = request_fingerprint("persisted");
        cache.put(&key, &outcome("persisted answer"));

        let (rehydrated, _) = cache_with_manual_clock(60_000, Some(dir));
        let hit = rehydrated.get(&key).expect("spilled entry");
        assert_eq!(hit.response, "persisted answer");
    }
}
