use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rand::random;

use crate::driver::RawDeviceHandle;

/// The key under which a native device handle is tracked.
pub(crate) type Key = u32;

/// The `Key` reserved to identify "no handle". Never returned by
/// `HandleRegistry::register`.
pub(crate) const EMPTY_KEY: Key = 0;

/// Create and return a new `Key` from a random number.
pub(crate) fn new_key() -> Key {
    let r = random();
    if r == EMPTY_KEY {
        r + 1
    } else {
        r
    }
}

/// Liveness tracking for the native device handles of one connection.
///
/// A handle is live while its key is present in the map. `mark_freed`
/// removes the key and surrenders the raw handle exactly once, so the
/// native resource can be released exactly once; every later resolution of
/// the same key fails.
#[derive(Debug, Default)]
pub(crate) struct HandleRegistry {
    live: HashMap<Key, RawDeviceHandle>,
}

impl HandleRegistry {
    /// Track `raw` under a fresh key and return the key.
    pub(crate) fn register(&mut self, raw: RawDeviceHandle) -> Key {
        // retry until an unused key is drawn
        loop {
            match self.live.entry(new_key()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(e) => {
                    let key = *e.key();
                    e.insert(raw);
                    return key;
                }
            }
        }
    }

    /// The raw handle for `key`, or `None` once it has been freed.
    pub(crate) fn get(&self, key: Key) -> Option<RawDeviceHandle> {
        self.live.get(&key).copied()
    }

    /// Whether `key` still refers to a live handle.
    pub(crate) fn is_live(&self, key: Key) -> bool {
        self.live.contains_key(&key)
    }

    /// Stop tracking `key`, returning the raw handle if it was still live.
    /// Calling this a second time is a no-op returning `None`.
    pub(crate) fn mark_freed(&mut self, key: Key) -> Option<RawDeviceHandle> {
        self.live.remove(&key)
    }

    /// The number of handles currently live.
    pub(crate) fn live_count(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{new_key, HandleRegistry, EMPTY_KEY};
    use crate::driver::RawDeviceHandle;

    #[test]
    fn new_key_never_empty() {
        for _ in 0..100 {
            assert_ne!(new_key(), EMPTY_KEY);
        }
    }

    #[test]
    fn register_then_get() {
        let mut reg = HandleRegistry::default();
        let raw = RawDeviceHandle(7);
        let key = reg.register(raw);
        assert!(reg.is_live(key));
        assert_eq!(reg.get(key), Some(raw));
        assert_eq!(reg.live_count(), 1);
    }

    #[test]
    fn mark_freed_is_idempotent() {
        let mut reg = HandleRegistry::default();
        let key = reg.register(RawDeviceHandle(3));
        assert_eq!(reg.mark_freed(key), Some(RawDeviceHandle(3)));
        assert_eq!(reg.mark_freed(key), None);
        assert!(!reg.is_live(key));
        assert_eq!(reg.get(key), None);
        assert_eq!(reg.live_count(), 0);
    }

    #[test]
    fn keys_are_distinct() {
        let mut reg = HandleRegistry::default();
        let k1 = reg.register(RawDeviceHandle(1));
        let k2 = reg.register(RawDeviceHandle(2));
        assert_ne!(k1, k2);
        assert_eq!(reg.get(k1), Some(RawDeviceHandle(1)));
        assert_eq!(reg.get(k2), Some(RawDeviceHandle(2)));
    }
}
