// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The concurrent ownership registry.
//!
//! The registry maps resource keys to the identity that owns them, plus a
//! value the owner registered and the set of identities the owner has granted
//! access to. It is touched by every concurrently running test and every
//! worker they spawn, so contention is confined to the key being operated on:
//! the backing map locks per shard, never globally.
//!
//! Records are append-only for the registry's lifetime. Registration races
//! resolve to first writer wins, grants are never revoked, and no operation
//! deletes another owner's record. One test can therefore never corrupt
//! another's isolation, even through misuse.

use crate::errors::NotOwnerError;
use crate::identity::{OwnerId, ResourceKey};
use crate::relay::SinkConfig;
use dashmap::{DashMap, mapref::entry::Entry};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// The outcome of an ownership lookup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchOwner {
    /// A candidate resolved; this is the key's actual owner, which differs
    /// from the matching candidate when the match went through a grant.
    Found(OwnerId),

    /// No candidate owns the key or holds a grant for it. A normal, fast
    /// outcome, not an error.
    NotFound,
}

impl FetchOwner {
    /// Returns the owner if one was found.
    pub fn found(self) -> Option<OwnerId> {
        match self {
            Self::Found(owner) => Some(owner),
            Self::NotFound => None,
        }
    }
}

struct OwnershipRecord<V> {
    owner: OwnerId,
    value: V,
    grantees: HashSet<OwnerId>,
}

/// A concurrent store of ownership records keyed by [`ResourceKey`].
///
/// `V` is whatever a registrant wants to associate with its key. The routing
/// layer uses the process-global instance at `V = `[`SinkConfig`]; peer
/// registries (a mocking framework's ownership store, say) pick their own
/// value type and participate through [`OwnershipPeer`].
pub struct OwnershipRegistry<V> {
    records: DashMap<ResourceKey, OwnershipRecord<V>>,
}

impl<V> std::fmt::Debug for OwnershipRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnershipRegistry")
            .field("len", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl<V> Default for OwnershipRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> OwnershipRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Claims `key` for `owner`, storing `initial_value`.
    ///
    /// If a record already exists for `key`, the existing value is returned
    /// unchanged and `initial_value` is discarded: first writer wins, and the
    /// loser cannot tell it lost except by inspecting the returned value.
    /// Atomic under concurrent calls for the same key.
    pub fn register(&self, owner: OwnerId, key: ResourceKey, initial_value: V) -> V {
        match self.records.entry(key) {
            Entry::Occupied(entry) => {
                debug!(
                    key = %entry.key(),
                    %owner,
                    "registration raced an existing record, returning winning value"
                );
                entry.get().value.clone()
            }
            Entry::Vacant(entry) => {
                let value = initial_value.clone();
                entry.insert(OwnershipRecord {
                    owner,
                    value: initial_value,
                    grantees: HashSet::new(),
                });
                value
            }
        }
    }

    /// Resolves which of `candidates`, tried in order, owns `key`.
    ///
    /// A candidate resolves either by being the owner or by holding an
    /// allowance grant; in both cases the returned identity is the actual
    /// owner. Absent keys resolve to [`FetchOwner::NotFound`] without
    /// blocking.
    pub fn fetch_owner(&self, candidates: &[OwnerId], key: &ResourceKey) -> FetchOwner {
        let Some(record) = self.records.get(key) else {
            return FetchOwner::NotFound;
        };
        for candidate in candidates {
            if record.owner == *candidate || record.grantees.contains(candidate) {
                return FetchOwner::Found(record.owner);
            }
        }
        FetchOwner::NotFound
    }

    /// Grants `grantee` the right to resolve ownership of `key`.
    ///
    /// `granter` must be the current owner or an existing grantee; grants are
    /// transitive but always collapse to the record's owner, so chains of
    /// grants never need to be walked at lookup time. Grants are monotonic
    /// and live as long as the registry.
    pub fn allow(
        &self,
        granter: OwnerId,
        grantee: OwnerId,
        key: &ResourceKey,
    ) -> Result<(), NotOwnerError> {
        let Some(mut record) = self.records.get_mut(key) else {
            return Err(NotOwnerError::new(granter, key.clone()));
        };
        if record.owner != granter && !record.grantees.contains(&granter) {
            return Err(NotOwnerError::new(granter, key.clone()));
        }
        record.grantees.insert(grantee);
        debug!(%granter, %grantee, %key, "recorded allowance grant");
        Ok(())
    }

    /// The keys currently owned by `identity`. Keys merely granted to
    /// `identity` are not included.
    pub fn owned_keys(&self, identity: OwnerId) -> Vec<ResourceKey> {
        self.records
            .iter()
            .filter(|record| record.value().owner == identity)
            .map(|record| record.key().clone())
            .collect()
    }

    /// Atomically reads and updates the value stored under `key`.
    ///
    /// `caller` must be the owner or a grantee. Returns the value after the
    /// update.
    pub fn get_and_update(
        &self,
        caller: OwnerId,
        key: &ResourceKey,
        update: impl FnOnce(&mut V),
    ) -> Result<V, NotOwnerError> {
        let Some(mut record) = self.records.get_mut(key) else {
            return Err(NotOwnerError::new(caller, key.clone()));
        };
        if record.owner != caller && !record.grantees.contains(&caller) {
            return Err(NotOwnerError::new(caller, key.clone()));
        }
        update(&mut record.value);
        Ok(record.value.clone())
    }
}

/// The registry the routing layer consults, shared across the whole test run.
pub type SharedRegistry = OwnershipRegistry<SinkConfig>;

static GLOBAL: OnceLock<Arc<SharedRegistry>> = OnceLock::new();

impl OwnershipRegistry<SinkConfig> {
    /// The process-global registry.
    ///
    /// Bring-up is idempotent: concurrent first callers race benignly and
    /// every caller observes the same instance for the life of the process.
    pub fn global() -> Arc<SharedRegistry> {
        GLOBAL.get_or_init(|| Arc::new(SharedRegistry::new())).clone()
    }
}

/// Object-safe surface through which the routing filter mirrors ownership
/// into registries it does not know the value type of.
pub trait OwnershipPeer: Send + Sync {
    /// See [`OwnershipRegistry::fetch_owner`].
    fn fetch_owner(&self, candidates: &[OwnerId], key: &ResourceKey) -> FetchOwner;

    /// See [`OwnershipRegistry::owned_keys`].
    fn owned_keys(&self, identity: OwnerId) -> Vec<ResourceKey>;

    /// See [`OwnershipRegistry::allow`].
    fn allow(
        &self,
        granter: OwnerId,
        grantee: OwnerId,
        key: &ResourceKey,
    ) -> Result<(), NotOwnerError>;
}

impl<V> OwnershipPeer for OwnershipRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fetch_owner(&self, candidates: &[OwnerId], key: &ResourceKey) -> FetchOwner {
        OwnershipRegistry::fetch_owner(self, candidates, key)
    }

    fn owned_keys(&self, identity: OwnerId) -> Vec<ResourceKey> {
        OwnershipRegistry::owned_keys(self, identity)
    }

    fn allow(
        &self,
        granter: OwnerId,
        grantee: OwnerId,
        key: &ResourceKey,
    ) -> Result<(), NotOwnerError> {
        OwnershipRegistry::allow(self, granter, grantee, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new(name)
    }

    #[test]
    fn register_returns_existing_value_to_losers() {
        let registry = OwnershipRegistry::new();
        let first = OwnerId::new_v4();
        let second = OwnerId::new_v4();

        assert_eq!(registry.register(first, key("k"), 1), 1);
        assert_eq!(registry.register(second, key("k"), 2), 1);
        assert_eq!(
            registry.fetch_owner(&[first], &key("k")),
            FetchOwner::Found(first),
        );
        assert_eq!(registry.fetch_owner(&[second], &key("k")), FetchOwner::NotFound);
    }

    #[test]
    fn concurrent_registration_has_exactly_one_winner() {
        let registry = Arc::new(OwnershipRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|value| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.register(OwnerId::new_v4(), key("contended"), value)
                })
            })
            .collect();

        let observed: Vec<u64> = handles
            .into_iter()
            .map(|handle| handle.join().expect("registrant thread panicked"))
            .collect();

        let winner = observed[0];
        assert!(
            observed.iter().all(|&value| value == winner),
            "every caller observes the same winning value, got {observed:?}"
        );
    }

    #[test]
    fn fetch_owner_honors_candidate_order_and_grants() {
        let registry = OwnershipRegistry::new();
        let owner = OwnerId::new_v4();
        let grantee = OwnerId::new_v4();
        let stranger = OwnerId::new_v4();

        registry.register(owner, key("k"), ());
        registry.allow(owner, grantee, &key("k")).expect("owner may grant");

        // A grant match still resolves to the actual owner.
        assert_eq!(
            registry.fetch_owner(&[stranger, grantee], &key("k")),
            FetchOwner::Found(owner),
        );
        assert_eq!(registry.fetch_owner(&[stranger], &key("k")), FetchOwner::NotFound);
        assert_eq!(registry.fetch_owner(&[], &key("k")), FetchOwner::NotFound);
    }

    #[test]
    fn allow_rejects_non_owners() {
        let registry = OwnershipRegistry::new();
        let owner = OwnerId::new_v4();
        let stranger = OwnerId::new_v4();

        registry.register(owner, key("k"), ());
        let err = registry
            .allow(stranger, OwnerId::new_v4(), &key("k"))
            .unwrap_err();
        assert_eq!(err.identity(), stranger);
        assert_eq!(err.resource_key(), &key("k"));

        // Absent keys are equally not grantable.
        assert!(registry.allow(owner, stranger, &key("absent")).is_err());
    }

    #[test]
    fn grants_are_transitive_through_grantees() {
        let registry = OwnershipRegistry::new();
        let owner = OwnerId::new_v4();
        let grantee = OwnerId::new_v4();
        let nested = OwnerId::new_v4();

        registry.register(owner, key("k"), ());
        registry.allow(owner, grantee, &key("k")).expect("owner may grant");
        registry
            .allow(grantee, nested, &key("k"))
            .expect("grantee may grant onward");

        assert_eq!(
            registry.fetch_owner(&[nested], &key("k")),
            FetchOwner::Found(owner),
        );
    }

    #[test]
    fn owned_keys_excludes_grants() {
        let registry = OwnershipRegistry::new();
        let owner = OwnerId::new_v4();
        let grantee = OwnerId::new_v4();

        registry.register(owner, key("a"), ());
        registry.register(owner, key("b"), ());
        registry.allow(owner, grantee, &key("a")).expect("owner may grant");

        let mut owned = registry.owned_keys(owner);
        owned.sort();
        assert_eq!(owned, vec![key("a"), key("b")]);
        assert_eq!(registry.owned_keys(grantee), Vec::new());
    }

    #[test]
    fn get_and_update_is_owner_gated() {
        let registry = OwnershipRegistry::new();
        let owner = OwnerId::new_v4();
        let stranger = OwnerId::new_v4();

        registry.register(owner, key("k"), 10);
        let updated = registry
            .get_and_update(owner, &key("k"), |value| *value += 1)
            .expect("owner may update");
        assert_eq!(updated, 11);

        assert!(registry.get_and_update(stranger, &key("k"), |_| {}).is_err());
    }

    #[test]
    fn global_bring_up_is_idempotent() {
        let first = SharedRegistry::global();
        let second = SharedRegistry::global();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
