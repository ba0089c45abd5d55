// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Side-effect event records.
//!
//! Events are produced by arbitrary workers and consumed by the routing
//! filter. They are immutable once produced: the filter forwards or drops
//! them, it never rewrites them.

use crate::identity::OwnerId;
use indexmap::IndexMap;
use serde::Serialize;
use smol_str::SmolStr;

/// The metadata map attached to an event.
///
/// Insertion order is preserved, matching the order in which producers attach
/// fields.
pub type EventMetadata = IndexMap<SmolStr, MetadataValue>;

/// Metadata key carrying an event's direct origin identity.
pub const ORIGIN_ID_KEY: &str = "origin_id";

/// Metadata key under which an event describing another process embeds that
/// process's descriptor. The descriptor's own [`METADATA_KEY`] entry may in
/// turn carry [`ORIGIN_ID_KEY`].
pub const CRASHED_WORKER_KEY: &str = "crashed_worker";

/// Metadata key for the nested metadata map inside a process descriptor.
pub const METADATA_KEY: &str = "metadata";

/// A single metadata value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Free-form text.
    Str(SmolStr),

    /// An owner identity embedded by the producer.
    Identity(OwnerId),

    /// A nested map, used by events that describe another process.
    Map(EventMetadata),
}

impl MetadataValue {
    /// Returns the embedded identity, if this value is one.
    pub fn as_identity(&self) -> Option<OwnerId> {
        match self {
            Self::Identity(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the nested map, if this value is one.
    pub fn as_map(&self) -> Option<&EventMetadata> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<OwnerId> for MetadataValue {
    fn from(id: OwnerId) -> Self {
        Self::Identity(id)
    }
}

/// Event severity, lowest first.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Diagnostic detail.
    Debug,
    /// Routine information.
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure.
    Error,
}

/// An immutable side-effect event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    /// Event severity.
    pub severity: Severity,

    /// The rendered payload, e.g. a log line.
    pub payload: String,

    /// Metadata attached by the producer.
    pub metadata: EventMetadata,
}

impl Event {
    /// Creates an event with empty metadata.
    pub fn new(severity: Severity, payload: impl Into<String>) -> Self {
        Self {
            severity,
            payload: payload.into(),
            metadata: EventMetadata::new(),
        }
    }

    /// Attaches a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<SmolStr>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn severity_orders_low_to_high() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
    }

    #[test]
    fn metadata_serializes_with_nested_shapes_intact() {
        let id = OwnerId::new_v4();
        let mut inner = EventMetadata::new();
        inner.insert(ORIGIN_ID_KEY.into(), MetadataValue::Identity(id));
        let mut descriptor = EventMetadata::new();
        descriptor.insert(METADATA_KEY.into(), MetadataValue::Map(inner));

        let event = Event::new(Severity::Error, "worker exited abnormally")
            .with_metadata(CRASHED_WORKER_KEY, MetadataValue::Map(descriptor));

        let value = serde_json::to_value(&event).expect("event serializes");
        assert_eq!(
            value,
            json!({
                "severity": "error",
                "payload": "worker exited abnormally",
                "metadata": {
                    "crashed_worker": {
                        "metadata": { "origin_id": id.to_string() }
                    }
                }
            })
        );
    }
}
