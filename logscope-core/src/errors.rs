// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by logscope.
//!
//! The taxonomy is deliberately small. Losing a registration race is not an
//! error (the loser transparently receives the winning value), and failing to
//! find an owner for an event is a routing decision, not an error. What
//! remains are the failures a caller must act on.

use crate::identity::{OwnerId, ResourceKey};
use crate::relay::CorrelationToken;
use std::time::Duration;
use thiserror::Error;

/// An identity tried to grant or update a resource key it does not own.
///
/// This indicates a bug in grant propagation on the caller's side, not a
/// normal runtime condition.
#[derive(Clone, Debug, Error)]
#[error("identity {identity} does not own resource key `{key}`")]
pub struct NotOwnerError {
    identity: OwnerId,
    key: ResourceKey,
}

impl NotOwnerError {
    pub(crate) fn new(identity: OwnerId, key: ResourceKey) -> Self {
        Self { identity, key }
    }

    /// The identity that attempted the operation.
    pub fn identity(&self) -> OwnerId {
        self.identity
    }

    /// The resource key the operation targeted.
    pub fn resource_key(&self) -> &ResourceKey {
        &self.key
    }
}

/// An assertion wait expired before the expected event arrived.
///
/// Owner lookups never produce this error: an unattributable event is dropped
/// long before the relay, so a timeout means the event was either never
/// produced or dropped as unattributed.
#[derive(Clone, Debug, Error)]
#[error(
    "no relayed event arrived for correlation token {token} within {waited:?} \
     (the event was never produced, or was dropped as unattributed)"
)]
pub struct DeliveryTimeoutError {
    token: CorrelationToken,
    waited: Duration,
}

impl DeliveryTimeoutError {
    pub(crate) fn new(token: CorrelationToken, waited: Duration) -> Self {
        Self { token, waited }
    }

    /// The correlation token that was waited on.
    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// How long the wait lasted before giving up.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// The relay endpoint shut down before acknowledging a submission.
#[derive(Clone, Debug, Error)]
#[error("relay endpoint shut down before acknowledging submission for token {token}")]
pub struct RelaySubmitError {
    token: CorrelationToken,
}

impl RelaySubmitError {
    pub(crate) fn new(token: CorrelationToken) -> Self {
        Self { token }
    }

    /// The correlation token of the failed submission.
    pub fn token(&self) -> CorrelationToken {
        self.token
    }
}
