// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-resource event routing filter.
//!
//! Event sources deliver every produced event to every attached sink; the
//! filter in front of each sink decides, synchronously and per event, whether
//! the event causally belongs to the sink's owner. Attribution is tried in two
//! stages: the producing worker's caller chain first, then identity hints
//! embedded in the event's metadata. Events that cannot be attributed are
//! dropped, which is the entire mechanism keeping concurrent tests from
//! observing each other's output.

mod extractors;

pub use extractors::{IdentityExtractor, default_extractors};

use crate::events::Event;
use crate::identity::{OwnerId, ResourceKey, WorkerContext};
use crate::registry::{FetchOwner, OwnershipPeer, SharedRegistry};
use debug_ignore::DebugIgnore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Interface for named filter stages executed by an event source in a defined
/// order.
pub trait EventFilter: Send + Sync {
    /// The stage's name, for configuration and trace output.
    fn name(&self) -> &str;

    /// Decides whether `event`, produced under `ctx`, passes this stage.
    fn check(&self, event: &Event, ctx: &WorkerContext) -> RouteDecision;
}

/// A filter stage's verdict on one event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteDecision {
    /// Forward the event, unmodified.
    Pass,

    /// Drop the event before it reaches the sink.
    Drop,
}

impl RouteDecision {
    /// Returns true for [`RouteDecision::Pass`].
    pub fn is_pass(self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// The ownership attribution filter guarding one sink.
///
/// Constructed per resource key with [`builder`](Self::builder); all fields
/// are fixed at construction. The only state the filter ever mutates is
/// registry grants, and only on a successful metadata fallback (step 4
/// below). Event content is never altered.
///
/// Per event, [`check`](EventFilter::check) runs:
///
/// 1. build candidates from the producing context (own identity, then chain);
/// 2. look the candidates up in the primary registry; found means pass;
/// 3. otherwise extract fallback candidates from metadata and look those up;
/// 4. on a fallback match with owner `O`, mirror every key `O` owns to the
///    producing worker's identity, in the primary registry and every peer, so
///    the worker's future events resolve directly;
/// 5. otherwise drop.
#[derive(Debug)]
pub struct AttributionFilter {
    key: ResourceKey,
    registry: DebugIgnore<Arc<dyn OwnershipPeer>>,
    peers: DebugIgnore<Vec<Arc<dyn OwnershipPeer>>>,
    extractors: Vec<IdentityExtractor>,
}

impl AttributionFilter {
    /// Starts building a filter for `key`.
    pub fn builder(key: ResourceKey) -> AttributionFilterBuilder {
        AttributionFilterBuilder {
            key,
            registry: None,
            peers: DebugIgnore(Vec::new()),
            extractors: None,
        }
    }

    /// The resource key this filter guards.
    pub fn resource_key(&self) -> &ResourceKey {
        &self.key
    }

    /// The primary registry followed by every peer.
    fn registries(&self) -> impl Iterator<Item = &Arc<dyn OwnershipPeer>> {
        std::iter::once(&self.registry.0).chain(self.peers.0.iter())
    }

    fn fallback_candidates(&self, event: &Event) -> Vec<OwnerId> {
        let mut candidates = Vec::new();
        for extractor in &self.extractors {
            if let Some(id) = extractor.extract(&event.metadata) {
                debug!(
                    extractor = extractor.name(),
                    %id,
                    "extracted fallback identity from event metadata"
                );
                if !candidates.contains(&id) {
                    candidates.push(id);
                }
            }
        }
        candidates
    }

    /// Mirrors every key `owner` holds to `grantee`, in the primary registry
    /// and every peer. Repairs attribution for the grantee's future events,
    /// amortizing the fallback lookup.
    fn propagate(&self, owner: OwnerId, grantee: OwnerId) {
        for registry in self.registries() {
            for key in registry.owned_keys(owner) {
                if let Err(error) = registry.allow(owner, grantee, &key) {
                    warn!(%key, %error, "ownership propagation failed");
                }
            }
        }
        debug!(%owner, %grantee, "propagated ownership after fallback attribution");
    }
}

impl EventFilter for AttributionFilter {
    fn name(&self) -> &str {
        "ownership-attribution"
    }

    fn check(&self, event: &Event, ctx: &WorkerContext) -> RouteDecision {
        let candidates = ctx.candidates();
        if let FetchOwner::Found(_) = self.registry.fetch_owner(&candidates, &self.key) {
            return RouteDecision::Pass;
        }

        let fallback = self.fallback_candidates(event);
        if fallback.is_empty() {
            debug!(key = %self.key, "dropping event with no attributable identity");
            return RouteDecision::Drop;
        }
        match self.registry.fetch_owner(&fallback, &self.key) {
            FetchOwner::Found(owner) => {
                self.propagate(owner, ctx.identity());
                RouteDecision::Pass
            }
            FetchOwner::NotFound => {
                debug!(key = %self.key, "dropping event, fallback identities own nothing here");
                RouteDecision::Drop
            }
        }
    }
}

/// Builder for [`AttributionFilter`].
#[derive(Debug)]
pub struct AttributionFilterBuilder {
    key: ResourceKey,
    registry: Option<DebugIgnore<Arc<dyn OwnershipPeer>>>,
    peers: DebugIgnore<Vec<Arc<dyn OwnershipPeer>>>,
    extractors: Option<Vec<IdentityExtractor>>,
}

impl AttributionFilterBuilder {
    /// Sets the primary registry. Defaults to [`SharedRegistry::global`].
    pub fn registry(mut self, registry: Arc<dyn OwnershipPeer>) -> Self {
        self.registry = Some(DebugIgnore(registry));
        self
    }

    /// Adds a peer registry to mirror ownership into.
    pub fn peer(mut self, peer: Arc<dyn OwnershipPeer>) -> Self {
        self.peers.0.push(peer);
        self
    }

    /// Replaces the extractor list. Defaults to [`default_extractors`].
    pub fn extractors(mut self, extractors: Vec<IdentityExtractor>) -> Self {
        self.extractors = Some(extractors);
        self
    }

    /// Builds the filter.
    pub fn build(self) -> AttributionFilter {
        let registry = self.registry.unwrap_or_else(|| {
            let global: Arc<dyn OwnershipPeer> = SharedRegistry::global();
            DebugIgnore(global)
        });
        AttributionFilter {
            key: self.key,
            registry,
            peers: self.peers,
            extractors: self.extractors.unwrap_or_else(default_extractors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MetadataValue, ORIGIN_ID_KEY, Severity};
    use crate::registry::OwnershipRegistry;

    fn filter_for(key: &str, registry: &Arc<OwnershipRegistry<()>>) -> AttributionFilter {
        AttributionFilter::builder(ResourceKey::new(key))
            .registry(Arc::clone(registry) as Arc<dyn OwnershipPeer>)
            .build()
    }

    #[test]
    fn passes_events_attributed_through_the_caller_chain() {
        let registry = Arc::new(OwnershipRegistry::new());
        let test_ctx = WorkerContext::root();
        registry.register(test_ctx.identity(), ResourceKey::new("k"), ());

        let worker = test_ctx.child();
        let nested = worker.child();
        let filter = filter_for("k", &registry);
        let event = Event::new(Severity::Info, "hello");

        assert_eq!(filter.check(&event, &nested), RouteDecision::Pass);
    }

    #[test]
    fn drops_events_with_no_attributable_identity() {
        let registry = Arc::new(OwnershipRegistry::new());
        let test_ctx = WorkerContext::root();
        registry.register(test_ctx.identity(), ResourceKey::new("k"), ());

        let unrelated = WorkerContext::root();
        let filter = filter_for("k", &registry);
        let event = Event::new(Severity::Error, "noise");

        assert_eq!(filter.check(&event, &unrelated), RouteDecision::Drop);
    }

    #[test]
    fn fallback_match_repairs_future_direct_lookups() {
        let registry = Arc::new(OwnershipRegistry::new());
        let test_ctx = WorkerContext::root();
        registry.register(test_ctx.identity(), ResourceKey::new("k"), ());

        let detached = WorkerContext::root();
        let filter = filter_for("k", &registry);

        let hinted = Event::new(Severity::Error, "crash report")
            .with_metadata(ORIGIN_ID_KEY, test_ctx.identity());
        assert_eq!(filter.check(&hinted, &detached), RouteDecision::Pass);

        // The second event carries no hint; the grant recorded during the
        // first check must be enough.
        let bare = Event::new(Severity::Info, "follow-up");
        assert_eq!(filter.check(&bare, &detached), RouteDecision::Pass);
    }

    #[test]
    fn fallback_match_mirrors_ownership_into_peers() {
        let registry = Arc::new(OwnershipRegistry::new());
        let peer: Arc<OwnershipRegistry<u32>> = Arc::new(OwnershipRegistry::new());
        let test_ctx = WorkerContext::root();
        registry.register(test_ctx.identity(), ResourceKey::new("k"), ());
        peer.register(test_ctx.identity(), ResourceKey::new("k"), 7);

        let detached = WorkerContext::root();
        let filter = AttributionFilter::builder(ResourceKey::new("k"))
            .registry(Arc::clone(&registry) as Arc<dyn OwnershipPeer>)
            .peer(Arc::clone(&peer) as Arc<dyn OwnershipPeer>)
            .build();

        let hinted = Event::new(Severity::Error, "crash report")
            .with_metadata(ORIGIN_ID_KEY, test_ctx.identity());
        assert_eq!(filter.check(&hinted, &detached), RouteDecision::Pass);

        assert_eq!(
            OwnershipPeer::fetch_owner(
                peer.as_ref(),
                &[detached.identity()],
                &ResourceKey::new("k")
            ),
            FetchOwner::Found(test_ctx.identity()),
            "the peer now recognizes the detached worker"
        );
    }

    #[test]
    fn fallback_identity_that_owns_nothing_still_drops() {
        let registry = Arc::new(OwnershipRegistry::new());
        let test_ctx = WorkerContext::root();
        registry.register(test_ctx.identity(), ResourceKey::new("k"), ());

        let detached = WorkerContext::root();
        let filter = filter_for("k", &registry);
        let event = Event::new(Severity::Error, "stray")
            .with_metadata(ORIGIN_ID_KEY, MetadataValue::Identity(OwnerId::new_v4()));

        assert_eq!(filter.check(&event, &detached), RouteDecision::Drop);
    }
}
