// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The acknowledge-then-forward relay endpoint.
//!
//! Some event sinks write to an out-of-band channel whose writer blocks until
//! the write is acknowledged. The relay turns that push-style protocol into
//! ordinary message receipt: [`RelayHandle::submit`] resolves as soon as the
//! endpoint acknowledges, and the endpoint forwards the payload plus its
//! correlation token to a statically configured recipient mailbox.
//!
//! Two submissions from the same caller are forwarded in submission order.
//! Submissions from different callers have no ordering relationship.

use crate::errors::RelaySubmitError;
use newtype_uuid::{TypedUuid, TypedUuidKind, TypedUuidTag};
use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
    oneshot,
};
use tracing::debug;

/// UUID kind for [`CorrelationToken`].
pub enum CorrelationTokenKind {}

impl TypedUuidKind for CorrelationTokenKind {
    fn tag() -> TypedUuidTag {
        const TAG: TypedUuidTag = TypedUuidTag::new("correlation-token");
        TAG
    }
}

/// Correlates relayed payloads with the sink that produced them.
pub type CorrelationToken = TypedUuid<CorrelationTokenKind>;

/// A payload delivered to the recipient mailbox.
#[derive(Clone, Debug)]
pub struct RelayMessage {
    /// The correlation token supplied at submission.
    pub token: CorrelationToken,

    /// The submitted payload.
    pub payload: String,
}

/// What a test registers against its resource key: the relay its sink writes
/// through, and the token its assertions wait on.
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Handle to the relay endpoint serving this sink.
    pub relay: RelayHandle,

    /// The token under which this sink's payloads are forwarded.
    pub token: CorrelationToken,
}

#[derive(Debug)]
struct RelayRequest {
    message: RelayMessage,
    ack: oneshot::Sender<()>,
}

/// The relay endpoint task.
///
/// Constructed with the recipient it forwards to, then either driven directly
/// via [`run`](Self::run) or spawned onto the current runtime with
/// [`spawn`](Self::spawn).
#[derive(Debug)]
pub struct RelayEndpoint {
    requests: UnboundedReceiver<RelayRequest>,
    recipient: UnboundedSender<RelayMessage>,
}

impl RelayEndpoint {
    /// Creates an endpoint forwarding to `recipient`, along with the handle
    /// callers submit through.
    pub fn new(recipient: UnboundedSender<RelayMessage>) -> (Self, RelayHandle) {
        let (requests_tx, requests_rx) = unbounded_channel();
        (
            Self {
                requests: requests_rx,
                recipient,
            },
            RelayHandle {
                requests: requests_tx,
            },
        )
    }

    /// Spawns the endpoint onto the current tokio runtime and returns the
    /// submission handle.
    pub fn spawn(recipient: UnboundedSender<RelayMessage>) -> RelayHandle {
        let (endpoint, handle) = Self::new(recipient);
        tokio::spawn(endpoint.run());
        handle
    }

    /// Runs the endpoint until every [`RelayHandle`] has been dropped.
    pub async fn run(mut self) {
        while let Some(RelayRequest { message, ack }) = self.requests.recv().await {
            // Acknowledge before forwarding: the writer's protocol requires
            // the ack regardless of what happens downstream.
            let _ = ack.send(());
            if self.recipient.send(message).is_err() {
                debug!("relay recipient hung up, payload discarded");
            }
        }
        debug!("all relay handles dropped, endpoint shutting down");
    }
}

/// Cloneable handle for submitting payloads to a [`RelayEndpoint`].
#[derive(Clone, Debug)]
pub struct RelayHandle {
    requests: UnboundedSender<RelayRequest>,
}

impl RelayHandle {
    /// Submits a payload and waits for the endpoint's acknowledgment.
    ///
    /// Resolution of this future means the endpoint accepted the submission,
    /// not that the recipient has seen it; delivery to the recipient mailbox
    /// happens asynchronously, at least once while the recipient is alive.
    pub async fn submit(
        &self,
        token: CorrelationToken,
        payload: impl Into<String>,
    ) -> Result<(), RelaySubmitError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let request = RelayRequest {
            message: RelayMessage {
                token,
                payload: payload.into(),
            },
            ack: ack_tx,
        };
        self.requests
            .send(request)
            .map_err(|_| RelaySubmitError::new(token))?;
        ack_rx.await.map_err(|_| RelaySubmitError::new(token))
    }
}
