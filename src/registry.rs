//! Explicit (non-global) hash-slot registries.
//!
//! §9's redesign note asks for the process-global AFI registry to become
//! an explicit object threaded through the database constructor instead
//! of a static, so tests can instantiate isolated instances — unlike the
//! teacher's `OnceLock<Arc<TrackStore>>` / `OnceCell<Arc<Paths>>` pattern.
//! [`HashSlots`] is the generic chained-rehash assignment used by every
//! hash-keyed table in the crate (AFI roots, file-hash-to-path maps,
//! album/artist keys).

use std::collections::HashMap;

use crate::hashing::rehash;

enum Slot<V> {
    Live(V),
    /// A deregistered slot. Kept so the hash is never handed out again,
    /// preserving key stability across the process lifetime (§4.A).
    Dead,
}

/// A table assigning stable `u32` slots to payloads, resolving
/// collisions by chained rehashing and preserving the first claimant.
pub struct HashSlots<V> {
    slots: HashMap<u32, Slot<V>>,
}

impl<V: PartialEq> HashSlots<V> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Assign (or recover) a stable slot for `payload`, starting the
    /// probe at `seed` and perturbing with `disambiguator` on collision.
    /// Re-registering an already-assigned payload returns the same slot.
    pub fn assign(&mut self, seed: u32, disambiguator: &str, payload: V) -> u32 {
        let mut h = seed;
        loop {
            match self.slots.get(&h) {
                None => {
                    self.slots.insert(h, Slot::Live(payload));
                    return h;
                }
                Some(Slot::Live(existing)) if *existing == payload => return h,
                Some(_) => {
                    h = rehash(h, disambiguator);
                }
            }
        }
    }

    pub fn get(&self, h: u32) -> Option<&V> {
        match self.slots.get(&h) {
            Some(Slot::Live(v)) => Some(v),
            _ => None,
        }
    }

    /// Deregister a slot: the payload is dropped but the hash is marked
    /// dead, never to be reassigned.
    pub fn retire(&mut self, h: u32) {
        if let Some(slot) = self.slots.get_mut(&h) {
            *slot = Slot::Dead;
        }
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (u32, &V)> {
        self.slots.iter().filter_map(|(h, s)| match s {
            Slot::Live(v) => Some((*h, v)),
            Slot::Dead => None,
        })
    }
}

impl<V: PartialEq> Default for HashSlots<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide-in-spirit, but-explicit-in-practice, registry from
/// encoded AFI-hash prefix to root path, plus a length-descending index
/// of root paths for absolute-path lookup (§4.A).
#[derive(Default)]
pub struct AfiRegistry {
    slots: HashMap<u32, String>,
    /// Root paths ordered longest-first so prefix lookup picks the most
    /// specific root.
    by_length: Vec<String>,
}

impl AfiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `root_path`, returning its stable 32-bit hash. Collisions
    /// with a *different* root are resolved by chained rehashing; calling
    /// this again for an already-registered root returns the same hash.
    pub fn register(&mut self, seed: u32, root_path: &str) -> u32 {
        let mut h = seed;
        loop {
            match self.slots.get(&h) {
                None => {
                    self.slots.insert(h, root_path.to_string());
                    self.by_length.push(root_path.to_string());
                    self.by_length.sort_by_key(|p| std::cmp::Reverse(p.len()));
                    return h;
                }
                Some(existing) if existing == root_path => return h,
                Some(_) => h = rehash(h, root_path),
            }
        }
    }

    /// Deregister a root by its hash; the hash slot is retired, not freed.
    pub fn deregister(&mut self, h: u32) {
        if let Some(path) = self.slots.remove(&h) {
            self.by_length.retain(|p| p != &path);
        }
    }

    pub fn root_for_hash(&self, h: u32) -> Option<&str> {
        self.slots.get(&h).map(|s| s.as_str())
    }

    /// Exact-match lookup, used when a caller already has the literal
    /// root string (e.g. `removeFileLocation`) rather than a file path
    /// somewhere under it.
    pub fn hash_for_exact_root(&self, root_path: &str) -> Option<u32> {
        self.slots
            .iter()
            .find(|(_, p)| p.as_str() == root_path)
            .map(|(h, _)| *h)
    }

    /// Find the longest registered root that is a case-insensitive prefix
    /// of `absolute_path`.
    pub fn root_for_path(&self, absolute_path: &str) -> Option<(&str, u32)> {
        let lowered = absolute_path.to_lowercase();
        self.by_length
            .iter()
            .find(|root| lowered.starts_with(&root.to_lowercase()))
            .map(|root| {
                let h = self
                    .slots
                    .iter()
                    .find(|(_, p)| *p == root)
                    .map(|(h, _)| *h)
                    .expect("root present in by_length must have a slot");
                (root.as_str(), h)
            })
    }

    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.by_length.iter().map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::fragment_hash;

    #[test]
    fn hash_slots_resolves_collisions_by_rehashing() {
        let mut slots: HashSlots<&str> = HashSlots::new();
        let a = slots.assign(1, "a", "payload-a");
        let b = slots.assign(1, "b", "payload-b");
        assert_ne!(a, b);
        assert_eq!(slots.get(a), Some(&"payload-a"));
        assert_eq!(slots.get(b), Some(&"payload-b"));
    }

    #[test]
    fn hash_slots_reassigns_same_slot_for_same_payload() {
        let mut slots: HashSlots<&str> = HashSlots::new();
        let first = slots.assign(5, "x", "same");
        let second = slots.assign(5, "x", "same");
        assert_eq!(first, second);
    }

    #[test]
    fn afi_registry_register_is_idempotent() {
        let mut reg = AfiRegistry::new();
        let h1 = reg.register(fragment_hash("/music"), "/music");
        let h2 = reg.register(fragment_hash("/music"), "/music");
        assert_eq!(h1, h2);
    }

    #[test]
    fn afi_registry_prefers_longest_matching_root() {
        let mut reg = AfiRegistry::new();
        reg.register(fragment_hash("/music"), "/music");
        reg.register(fragment_hash("/music/rock"), "/music/rock");
        let (root, _) = reg.root_for_path("/music/rock/song.mp3").unwrap();
        assert_eq!(root, "/music/rock");
    }

    #[test]
    fn afi_registry_deregister_retires_the_slot() {
        let mut reg = AfiRegistry::new();
        let h = reg.register(fragment_hash("/music"), "/music");
        reg.deregister(h);
        assert!(reg.root_for_hash(h).is_none());
    }
}
