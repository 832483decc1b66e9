//! Core types and shared utilities for the creeper firehose ingestor.
//!
//! This crate provides:
//! - The Jetstream frame envelope and the pipeline [`Event`] decoded from it
//! - Typed `app.bsky.feed.post` records, decoded lazily from commit payloads
//! - The outbound [`DerivedEvent`] republished to Kafka
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
pub mod metrics;
mod post;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Collection NSID of Bluesky post records.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Public Jetstream instance used when no endpoint is configured.
pub const DEFAULT_JETSTREAM_URL: &str = "wss://jetstream.atproto.tools/subscribe";

pub use error::{Error, Result};
pub use event::{Commit, Event, EventKind, Frame, Operation, TimeUs};
pub use post::{
    Blob, BlobRef, ByteIndex, DerivedEvent, Dimensions, Embed, ExternalEmbed, Facet, Feature,
    FeatureKind, ImageEmbed, Post, RecordEmbed, Reference, Reply,
};
