// Copyright (c) The logscope Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fallback identity extraction from event metadata.
//!
//! When the caller chain fails to attribute an event, the filter consults an
//! ordered list of extractors, each of which knows one metadata shape that can
//! embed an owner identity. The set of shapes is open: third-party producers
//! attach identities in their own layouts, so filters accept custom extractor
//! lists. [`default_extractors`] covers the two stable shapes documented on
//! [`crate::events`].

use crate::events::{CRASHED_WORKER_KEY, EventMetadata, METADATA_KEY, ORIGIN_ID_KEY};
use crate::identity::OwnerId;
use debug_ignore::DebugIgnore;

type ExtractFn = Box<dyn Fn(&EventMetadata) -> Option<OwnerId> + Send + Sync>;

/// A single named metadata shape that may yield an owner identity.
///
/// Extraction is infallible in the error sense: metadata that does not match
/// the shape produces `None`, never a panic or an error.
#[derive(Debug)]
pub struct IdentityExtractor {
    name: &'static str,
    extract: DebugIgnore<ExtractFn>,
}

impl IdentityExtractor {
    /// Creates an extractor with a name used in trace output.
    pub fn new(
        name: &'static str,
        extract: impl Fn(&EventMetadata) -> Option<OwnerId> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            extract: DebugIgnore(Box::new(extract)),
        }
    }

    /// The extractor's name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn extract(&self, metadata: &EventMetadata) -> Option<OwnerId> {
        (self.extract.0)(metadata)
    }
}

/// The stable default shapes, tried in order:
///
/// 1. a direct `origin_id` entry holding an identity;
/// 2. a `crashed_worker` descriptor (an event reporting on another process)
///    whose nested `metadata` map holds an `origin_id` identity.
pub fn default_extractors() -> Vec<IdentityExtractor> {
    vec![
        IdentityExtractor::new("origin-id", |metadata| {
            metadata.get(ORIGIN_ID_KEY)?.as_identity()
        }),
        IdentityExtractor::new("crashed-worker-origin", |metadata| {
            metadata
                .get(CRASHED_WORKER_KEY)?
                .as_map()?
                .get(METADATA_KEY)?
                .as_map()?
                .get(ORIGIN_ID_KEY)?
                .as_identity()
        }),
    ]
}
