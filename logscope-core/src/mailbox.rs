// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The assertion side of the relay: a mailbox tests wait on.
//!
//! A test wires a [`RelayMailbox`] up as the relay recipient, hands the sender
//! to [`RelayEndpoint::spawn`](crate::relay::RelayEndpoint::spawn), and then
//! asserts receipt with [`RelayMailbox::expect`]. Waits are always bounded: an
//! absent event surfaces as [`DeliveryTimeoutError`], never as a hang.

use crate::errors::DeliveryTimeoutError;
use crate::relay::{CorrelationToken, RelayMessage};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::Instant;

/// How long [`RelayMailbox::expect`] waits when no timeout is given.
pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_millis(300);

/// Receives `(correlation token, payload)` tuples from a relay endpoint and
/// answers bounded "did this token's event arrive" queries.
#[derive(Debug)]
pub struct RelayMailbox {
    messages: UnboundedReceiver<RelayMessage>,
    // Messages received while waiting for a different token. Kept so that
    // interleaved deliveries from multiple relays are not lost.
    buffered: VecDeque<RelayMessage>,
}

impl RelayMailbox {
    /// Creates a mailbox along with the sender to configure a relay endpoint
    /// with.
    pub fn channel() -> (UnboundedSender<RelayMessage>, Self) {
        let (tx, rx) = unbounded_channel();
        (
            tx,
            Self {
                messages: rx,
                buffered: VecDeque::new(),
            },
        )
    }

    /// Waits for the payload relayed under `token`.
    ///
    /// Waits at most `timeout`, defaulting to [`DEFAULT_EXPECT_TIMEOUT`].
    /// Messages for other tokens that arrive in the meantime are buffered for
    /// later `expect` calls, so receipt order across tokens does not matter.
    pub async fn expect(
        &mut self,
        token: CorrelationToken,
        timeout: Option<Duration>,
    ) -> Result<String, DeliveryTimeoutError> {
        let waited = timeout.unwrap_or(DEFAULT_EXPECT_TIMEOUT);
        if let Some(position) = self.buffered.iter().position(|m| m.token == token) {
            let message = self.buffered.remove(position).expect("position is in bounds");
            return Ok(message.payload);
        }

        let deadline = Instant::now() + waited;
        loop {
            let message = match tokio::time::timeout_at(deadline, self.messages.recv()).await {
                Ok(Some(message)) => message,
                // Closed channel: every relay handle and endpoint is gone, so
                // the event can no longer arrive. Report the same failure as
                // an expired wait.
                Ok(None) => return Err(DeliveryTimeoutError::new(token, waited)),
                Err(_) => return Err(DeliveryTimeoutError::new(token, waited)),
            };
            if message.token == token {
                return Ok(message.payload);
            }
            self.buffered.push_back(message);
        }
    }

    /// Returns an already-delivered message without waiting, if any.
    pub fn try_recv(&mut self) -> Option<RelayMessage> {
        if let Some(message) = self.buffered.pop_front() {
            return Some(message);
        }
        self.messages.try_recv().ok()
    }
}
