// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Explicit attribution propagation for workers with no usable caller chain.
//!
//! Most workers are attributed through the chain they carry. A worker that
//! performs work on behalf of a test without having been spawned by it (a
//! pooled worker, say) has no such chain, and its first event would race any
//! after-the-fact repair. The helper here is called by the owner *before*
//! signaling such a worker to start, so the grant is visible by the time the
//! worker's first event reaches the filter.

use crate::errors::NotOwnerError;
use crate::identity::{OwnerId, ResourceKey};
use crate::registry::OwnershipPeer;
use std::sync::Arc;
use tracing::debug;

/// Grants `grantee` access to `key` on the primary registry and mirrors the
/// grant to each peer.
///
/// Fails with [`NotOwnerError`] if `owner` does not own (or hold a grant for)
/// `key` on the primary registry. Peers that do not track `key` are skipped;
/// a peer only needs the grant if the same key is registered there.
pub fn pre_authorize(
    registry: &dyn OwnershipPeer,
    peers: &[Arc<dyn OwnershipPeer>],
    owner: OwnerId,
    grantee: OwnerId,
    key: &ResourceKey,
) -> Result<(), NotOwnerError> {
    registry.allow(owner, grantee, key)?;
    for peer in peers {
        if let Err(error) = peer.allow(owner, grantee, key) {
            debug!(%key, %error, "peer registry skipped pre-authorization");
        }
    }
    debug!(%owner, %grantee, %key, "pre-authorized worker");
    Ok(())
}
