//! Busy-set mutual-exclusion guard.
//!
//! While a mutating operation holds a key's busy token, any *other* operation
//! on that key is rejected rather than queued. This is cross-operation
//! exclusivity; same-operation requests coalesce in the single-flight map
//! instead. `try_acquire` never blocks.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::key::ResourceKey;

/// Non-blocking exclusivity markers, one per busy resource key.
pub struct BusyGuard {
    tokens: DashMap<ResourceKey, Instant>,
}

impl BusyGuard {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
        }
    }

    /// Claim the key. Returns false if another operation already holds it.
    pub fn try_acquire(&self, key: &ResourceKey) -> bool {
        match self.tokens.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
                true
            }
        }
    }

    /// Release the key. Releasing an unheld key is a no-op.
    pub fn release(&self, key: &ResourceKey) {
        self.tokens.remove(key);
    }

    pub fn is_busy(&self, key: &ResourceKey) -> bool {
        self.tokens.contains_key(key)
    }

    /// Drop tokens older than `max_age` and return the released keys.
    /// Backstop for tokens orphaned by a hung operation.
    pub fn release_stale(&self, max_age: Duration) -> Vec<ResourceKey> {
        let stale: Vec<ResourceKey> = self
            .tokens
            .iter()
            .filter(|entry| entry.value().elapsed() > max_age)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &stale {
            self.tokens.remove_if(key, |_, held_at| held_at.elapsed() > max_age);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for BusyGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> ResourceKey {
        ResourceKey::normalize(raw)
    }

    #[test]
    fn second_acquire_fails_until_release() {
        let guard = BusyGuard::new();
        assert!(guard.try_acquire(&key("/Game/Foo")));
        assert!(!guard.try_acquire(&key("/Game/Foo")));
        guard.release(&key("/Game/Foo"));
        assert!(guard.try_acquire(&key("/Game/Foo")));
    }

    #[test]
    fn keys_are_independent() {
        let guard = BusyGuard::new();
        assert!(guard.try_acquire(&key("/a")));
        assert!(guard.try_acquire(&key("/b")));
        assert_eq!(guard.len(), 2);
    }

    #[test]
    fn normalized_spellings_collide() {
        let guard = BusyGuard::new();
        assert!(guard.try_acquire(&key("/Game/Foo")));
        assert!(!guard.try_acquire(&key("game\\foo/")));
    }

    #[test]
    fn release_stale_only_drops_old_tokens() {
        let guard = BusyGuard::new();
        guard.try_acquire(&key("/fresh"));
        let released = guard.release_stale(Duration::from_secs(60));
        assert!(released.is_empty());
        assert!(guard.is_busy(&key("/fresh")));

        let released = guard.release_stale(Duration::ZERO);
        assert_eq!(released.len(), 1);
        assert!(!guard.is_busy(&key("/fresh")));
    }
}
