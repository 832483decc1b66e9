//! Typed `app.bsky.feed.post` records and the derived outbound event.

use crate::error::Result;
use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Bluesky post record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Record type, normally `app.bsky.feed.post`.
    #[serde(rename = "$type", default, skip_serializing_if = "String::is_empty")]
    pub record_type: String,

    /// Client-declared creation time.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    pub text: String,

    /// BCP-47 language tags declared by the client.
    #[serde(rename = "langs", default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,

    /// Rich text annotations (mentions, links, tags).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub facets: Vec<Facet>,

    /// Reply context, present when the post answers another post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Reply>,
}

/// An embedded record or media within a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    /// Embed type, e.g. `app.bsky.embed.images`.
    #[serde(rename = "$type", default)]
    pub embed_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordEmbed>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageEmbed>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalEmbed>,
}

/// A quoted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEmbed {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEmbed {
    #[serde(default)]
    pub alt: String,
    #[serde(rename = "aspectRatio", default)]
    pub aspect_ratio: Dimensions,
    #[serde(default)]
    pub image: Blob,
}

/// An external link card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEmbed {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumb: Blob,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub height: i64,
    pub width: i64,
}

/// Reference to uploaded binary data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(rename = "$type", default)]
    pub blob_type: String,
    #[serde(rename = "ref", default)]
    pub blob_ref: BlobRef,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    #[serde(rename = "$link", default)]
    pub link: String,
}

/// A rich text annotation over a byte range of the post text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    #[serde(rename = "$type", default)]
    pub facet_type: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    pub index: ByteIndex,
}

/// A single facet feature such as a mention, link or hashtag.
///
/// Only the field matching the feature's type is populated upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// e.g. `app.bsky.richtext.facet#mention`
    #[serde(rename = "$type", default)]
    pub feature_type: String,
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub uri: String,
}

/// Classified facet feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureKind<'a> {
    Link(&'a str),
    Mention(&'a str),
    Tag(&'a str),
    Unknown,
}

impl Post {
    /// Hashtags from the post's tag facets, in text order.
    pub fn hashtags(&self) -> Vec<&str> {
        self.facets
            .iter()
            .flat_map(|facet| &facet.features)
            .filter_map(|feature| match feature.kind() {
                FeatureKind::Tag(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }
}

impl Feature {
    /// Classify this feature by the fragment of its `$type`.
    pub fn kind(&self) -> FeatureKind<'_> {
        match self.feature_type.split_once('#').map(|(_, fragment)| fragment) {
            Some("link") => FeatureKind::Link(&self.uri),
            Some("mention") => FeatureKind::Mention(&self.did),
            Some("tag") => FeatureKind::Tag(&self.tag),
            _ => FeatureKind::Unknown,
        }
    }
}

/// Byte range (UTF-8 offsets, end exclusive) within the post text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteIndex {
    #[serde(rename = "byteStart")]
    pub byte_start: i64,
    #[serde(rename = "byteEnd")]
    pub byte_end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub parent: Reference,
    pub root: Reference,
}

/// Strong reference to another post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub cid: String,
    #[serde(default)]
    pub uri: String,
}

/// A post accepted by the filters, as published to Kafka.
///
/// Serialized as `{"Did": …, "TimeUS": <RFC 3339>, "Post": {…}}`, the shape
/// consumers of the `raw-posts` topic already read. Keyed by `did` so that a
/// partition carries one account's posts in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedEvent {
    /// Decentralized identifier of the author.
    #[serde(rename = "Did")]
    pub did: String,

    /// When upstream observed the event.
    #[serde(rename = "TimeUS")]
    pub observed_at: DateTime<Utc>,

    #[serde(rename = "Post")]
    pub post: Post,
}

impl DerivedEvent {
    /// Build the derived event for a decoded post.
    pub fn new(event: &Event, post: Post) -> Result<Self> {
        Ok(Self {
            did: event.did.clone(),
            observed_at: event.observed_at()?,
            post,
        })
    }

    /// Partition key for the broker.
    pub fn key(&self) -> &[u8] {
        self.did.as_bytes()
    }

    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
