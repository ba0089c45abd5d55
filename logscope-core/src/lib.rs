// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Ownership attribution and event routing for concurrently running tests.
//!
//! Many independent tests run at once, each needing to observe exactly the
//! side-effect events (log-like records) that causally belong to it, even
//! when those events originate in workers the test never directly created.
//! logscope attributes every event to its owning test and routes it
//! accordingly:
//!
//! - [`registry`] maps resource keys to the identity that owns them, with
//!   candidate-list lookup and explicit allowance grants;
//! - [`routing`] filters each produced event by caller-chain lookup with a
//!   metadata-hint fallback, dropping what cannot be attributed;
//! - [`relay`] turns blocking push-style sink writes into receivable
//!   messages;
//! - [`mailbox`] gives tests a bounded receive-and-assert primitive over
//!   relayed payloads;
//! - [`propagation`] pre-authorizes workers whose causal link to a test
//!   exists only by explicit handoff.
//!
//! Caller chains are carried explicitly across spawn boundaries via
//! [`identity::WorkerContext`]; nothing is inferred from runtime parent-child
//! relationships.

pub mod errors;
pub mod events;
pub mod identity;
pub mod mailbox;
pub mod propagation;
pub mod registry;
pub mod relay;
pub mod routing;
