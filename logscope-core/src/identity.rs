// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Owner identities, resource keys, and explicit caller-chain propagation.
//!
//! Every logical test context and every worker it spawns carries a
//! [`WorkerContext`]. Contexts are never inferred from runtime parent-child
//! relationships: crossing a spawn boundary means calling
//! [`WorkerContext::child`] and handing the result to the new worker before it
//! produces any event. This keeps attribution a plain data dependency that can
//! be followed in the source.

use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use smallvec::SmallVec;
use smol_str::SmolStr;
use std::fmt;

/// UUID kind for [`OwnerId`].
pub enum OwnerIdKind {}

impl TypedUuidKind for OwnerIdKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("owner-id");
        TAG
    }
}

/// Identifies a logical owner: a test context or one of the workers acting on
/// its behalf.
///
/// Owner IDs are unique for the lifetime of the process and are never reused
/// while the owner is alive.
pub type OwnerId = TypedUuid<OwnerIdKind>;

/// Identifies a single testable resource instance within a registry, such as
/// one attached event sink.
///
/// Tests typically use their own unique test name as the key.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ResourceKey(SmolStr);

impl ResourceKey {
    /// Creates a new resource key.
    pub fn new(key: impl Into<SmolStr>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// The ordered ancestry of a worker: the identities that logically initiated
/// its execution, immediate initiator first.
///
/// The chain never contains the worker's own identity; that is prepended at
/// lookup time by [`WorkerContext::candidates`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CallerChain {
    callers: SmallVec<[OwnerId; 4]>,
}

impl CallerChain {
    /// Creates an empty chain, suitable for a root context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the chain has no ancestors.
    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }

    /// The number of ancestors in the chain.
    pub fn len(&self) -> usize {
        self.callers.len()
    }

    /// Iterates over ancestors, immediate initiator first.
    pub fn iter(&self) -> impl Iterator<Item = OwnerId> + '_ {
        self.callers.iter().copied()
    }

    fn pushed_front(&self, initiator: OwnerId) -> Self {
        let mut callers = SmallVec::with_capacity(self.callers.len() + 1);
        callers.push(initiator);
        callers.extend(self.callers.iter().copied());
        Self { callers }
    }
}

/// The identity and ancestry a worker carries along its execution.
///
/// A context is created once per logical test with [`WorkerContext::root`] and
/// then forked with [`WorkerContext::child`] at every spawn boundary.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    identity: OwnerId,
    callers: CallerChain,
}

impl WorkerContext {
    /// Creates a context with a fresh identity and no ancestry.
    ///
    /// Used by a test at the start of its arrangement phase, and by workers
    /// whose causal link to a test is established only through an explicit
    /// allowance grant.
    pub fn root() -> Self {
        Self {
            identity: OwnerId::new_v4(),
            callers: CallerChain::new(),
        }
    }

    /// The identity of this context.
    pub fn identity(&self) -> OwnerId {
        self.identity
    }

    /// The ancestry of this context.
    pub fn callers(&self) -> &CallerChain {
        &self.callers
    }

    /// Derives the context for a newly spawned worker.
    ///
    /// The child gets a fresh identity; its chain is this context's identity
    /// followed by this context's own ancestors. Call this on the spawning
    /// side and move the result into the worker.
    pub fn child(&self) -> Self {
        Self {
            identity: OwnerId::new_v4(),
            callers: self.callers.pushed_front(self.identity),
        }
    }

    /// The identities eligible to resolve ownership for an event produced by
    /// this context: its own identity followed by the caller chain.
    pub fn candidates(&self) -> Vec<OwnerId> {
        let mut candidates = Vec::with_capacity(1 + self.callers.len());
        candidates.push(self.identity);
        candidates.extend(self.callers.iter());
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_chain_lists_immediate_initiator_first() {
        let test_ctx = WorkerContext::root();
        let worker = test_ctx.child();
        let nested = worker.child();

        let chain: Vec<_> = nested.callers().iter().collect();
        assert_eq!(chain, vec![worker.identity(), test_ctx.identity()]);
    }

    #[test]
    fn candidates_start_with_own_identity() {
        let test_ctx = WorkerContext::root();
        let worker = test_ctx.child();

        let candidates = worker.candidates();
        assert_eq!(
            candidates,
            vec![worker.identity(), test_ctx.identity()],
            "own identity is implicitly prepended to the chain"
        );
    }

    #[test]
    fn root_contexts_have_distinct_identities() {
        assert_ne!(WorkerContext::root().identity(), WorkerContext::root().identity());
    }
}
