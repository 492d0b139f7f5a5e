//! Holder-based retention.
//!
//! Entities stay in the store only while at least one holder retains
//! them. Retention is reference counting by named holder rather than by
//! count, so a holder re-declaring its interest is idempotent and a
//! single release cannot strand someone else's entities.

use crate::types::{HoldKind, IdKey};
use std::collections::{HashMap, HashSet};

/// A named retention scope.
///
/// Identified by name alone; the hold kind is a property of the scope,
/// not part of its identity, so re-registering a holder under a
/// different kind addresses the same holds.
#[derive(Debug, Clone)]
pub struct Holder {
    /// Caller-chosen scope name, e.g. a screen or job identifier.
    pub name: String,
    /// Release policy.
    pub kind: HoldKind,
}

impl PartialEq for Holder {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Holder {}

impl std::hash::Hash for Holder {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Holder {
    /// Creates a persistent holder.
    #[must_use]
    pub fn persistent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HoldKind::Persistent,
        }
    }

    /// Creates a session holder.
    #[must_use]
    pub fn session(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: HoldKind::Session,
        }
    }
}

/// Tracks which holders retain which entities, with a reverse index so
/// eviction candidates fall out of every release in O(keys touched).
#[derive(Debug, Default)]
pub struct HolderLedger {
    holds: HashMap<Holder, HashSet<IdKey>>,
    held_by: HashMap<IdKey, HashSet<Holder>>,
}

impl HolderLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `holder` retains `key`. Idempotent.
    pub fn hold(&mut self, holder: &Holder, key: IdKey) {
        self.holds.entry(holder.clone()).or_default().insert(key);
        self.held_by.entry(key).or_default().insert(holder.clone());
    }

    /// Releases specific keys from a holder.
    ///
    /// Returns the keys that are no longer retained by anyone.
    pub fn release_keys(&mut self, holder: &Holder, keys: &[IdKey]) -> Vec<IdKey> {
        let mut unheld = Vec::new();
        for key in keys {
            let emptied = match self.holds.get_mut(holder) {
                Some(held) => {
                    held.remove(key);
                    held.is_empty()
                }
                None => continue,
            };
            if emptied {
                self.holds.remove(holder);
            }
            if self.drop_reverse(*key, holder) {
                unheld.push(*key);
            }
        }
        unheld
    }

    /// Releases everything a holder retains.
    ///
    /// Returns the keys that are no longer retained by anyone.
    pub fn release(&mut self, holder: &Holder) -> Vec<IdKey> {
        let Some(held) = self.holds.remove(holder) else {
            return Vec::new();
        };
        let mut unheld = Vec::new();
        for key in held {
            if self.drop_reverse(key, holder) {
                unheld.push(key);
            }
        }
        unheld
    }

    /// Releases every session holder at once.
    ///
    /// Returns the keys that are no longer retained by anyone.
    pub fn release_session(&mut self) -> Vec<IdKey> {
        let session: Vec<Holder> = self
            .holds
            .keys()
            .filter(|h| h.kind == HoldKind::Session)
            .cloned()
            .collect();
        let mut unheld = Vec::new();
        for holder in session {
            unheld.extend(self.release(&holder));
        }
        unheld
    }

    /// Removes `holder` from a key's reverse entry; true if the key is
    /// now unheld.
    fn drop_reverse(&mut self, key: IdKey, holder: &Holder) -> bool {
        match self.held_by.get_mut(&key) {
            Some(holders) => {
                holders.remove(holder);
                if holders.is_empty() {
                    self.held_by.remove(&key);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// True if any holder retains the key.
    #[must_use]
    pub fn is_held(&self, key: IdKey) -> bool {
        self.held_by.contains_key(&key)
    }

    /// The holders currently retaining a key.
    #[must_use]
    pub fn holders_of(&self, key: IdKey) -> Vec<&Holder> {
        self.held_by
            .get(&key)
            .map(|holders| holders.iter().collect())
            .unwrap_or_default()
    }

    /// Iterates every (holder, key) pair, for persistence snapshots.
    pub fn entries(&self) -> impl Iterator<Item = (&Holder, IdKey)> {
        self.holds
            .iter()
            .flat_map(|(holder, keys)| keys.iter().map(move |key| (holder, *key)))
    }

    /// Number of holders with at least one retained key.
    #[must_use]
    pub fn len(&self) -> usize {
        self.holds.len()
    }

    /// True if no holder retains anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> IdKey {
        IdKey::from_bytes([byte; 32])
    }

    #[test]
    fn release_returns_unheld_keys_only() {
        let mut ledger = HolderLedger::new();
        let a = Holder::persistent("screen-a");
        let b = Holder::persistent("screen-b");

        ledger.hold(&a, key(1));
        ledger.hold(&a, key(2));
        ledger.hold(&b, key(2));

        let mut unheld = ledger.release(&a);
        unheld.sort_by_key(|k| *k.as_bytes());
        // key 2 is still held by b.
        assert_eq!(unheld, vec![key(1)]);
        assert!(ledger.is_held(key(2)));
        assert!(!ledger.is_held(key(1)));
    }

    #[test]
    fn hold_is_idempotent() {
        let mut ledger = HolderLedger::new();
        let a = Holder::persistent("a");
        ledger.hold(&a, key(1));
        ledger.hold(&a, key(1));
        assert_eq!(ledger.release(&a), vec![key(1)]);
        assert!(ledger.is_empty());
    }

    #[test]
    fn release_keys_is_partial() {
        let mut ledger = HolderLedger::new();
        let a = Holder::persistent("a");
        ledger.hold(&a, key(1));
        ledger.hold(&a, key(2));

        assert_eq!(ledger.release_keys(&a, &[key(1)]), vec![key(1)]);
        assert!(ledger.is_held(key(2)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn session_release_spares_persistent_holders() {
        let mut ledger = HolderLedger::new();
        let screen = Holder::session("screen");
        let pinned = Holder::persistent("pinned");

        ledger.hold(&screen, key(1));
        ledger.hold(&screen, key(2));
        ledger.hold(&pinned, key(2));

        let unheld = ledger.release_session();
        assert_eq!(unheld, vec![key(1)]);
        assert!(ledger.is_held(key(2)));
        assert!(!ledger.is_held(key(1)));
    }

    #[test]
    fn entries_enumerate_all_pairs() {
        let mut ledger = HolderLedger::new();
        let a = Holder::persistent("a");
        let b = Holder::session("b");
        ledger.hold(&a, key(1));
        ledger.hold(&b, key(1));
        ledger.hold(&b, key(2));
        assert_eq!(ledger.entries().count(), 3);
    }
}
