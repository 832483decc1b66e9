//! Jetstream frame envelope and the pipeline event decoded from it.
//!
//! Jetstream delivers one JSON object per WebSocket message:
//!
//! ```text
//! {"did":"did:plc:…","time_us":1725911162329308,"kind":"commit",
//!  "commit":{"rev":"…","operation":"create","collection":"app.bsky.feed.post",
//!            "rkey":"…","record":{…},"cid":"…"}}
//! ```
//!
//! Only the envelope is decoded eagerly. The commit `record` is kept as raw JSON
//! and decoded into a [`Post`] by whichever worker ends up handling the event.

use crate::error::{Error, Result};
use crate::post::Post;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Upstream sequence time in microseconds since the Unix epoch.
///
/// This is also the cursor unit: Jetstream replays inclusively from a `time_us`.
pub type TimeUs = i64;

/// Top-level kind of a Jetstream frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A repository commit (record create/update/delete).
    Commit,
    /// An identity (handle/DID document) update.
    Identity,
    /// An account status change.
    Account,
    /// Any kind this build does not know about.
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Identity => "identity",
            Self::Account => "account",
            Self::Unknown => "unknown",
        }
    }
}

/// Record operation carried by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Any operation this build does not know about.
    #[serde(other)]
    Unknown,
}

/// Commit body of a Jetstream frame.
#[derive(Debug, Deserialize)]
pub struct Commit {
    /// Repository revision.
    #[serde(default)]
    pub rev: String,
    pub operation: Operation,
    /// Collection NSID, e.g. `app.bsky.feed.post`.
    pub collection: String,
    /// Record key within the collection.
    pub rkey: String,
    /// Record body, absent for deletes.
    #[serde(default)]
    pub record: Option<Box<RawValue>>,
    /// Content identifier of the record, absent for deletes.
    #[serde(default)]
    pub cid: Option<String>,
}

/// A raw Jetstream frame as decoded from the wire.
#[derive(Debug, Deserialize)]
pub struct Frame {
    /// Originating account.
    pub did: String,
    pub time_us: TimeUs,
    pub kind: EventKind,
    #[serde(default)]
    pub commit: Option<Commit>,
}

impl Frame {
    /// Decode a frame from a UTF-8 JSON message.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let frame: Frame = serde_json::from_slice(bytes)?;
        if frame.did.is_empty() {
            return Err(Error::InvalidField {
                field: "did",
                reason: "empty".to_string(),
            });
        }
        Ok(frame)
    }

    /// Convert a commit frame into a pipeline [`Event`].
    ///
    /// Returns `None` for identity/account frames and for commit frames that
    /// are missing their commit body.
    pub fn into_event(self) -> Option<Event> {
        if self.kind != EventKind::Commit {
            return None;
        }
        let commit = self.commit?;
        Some(Event {
            did: self.did,
            time_us: self.time_us,
            operation: commit.operation,
            collection: commit.collection,
            rkey: commit.rkey,
            payload: commit.record,
        })
    }
}

/// One observed record mutation flowing through the pipeline.
///
/// Events are created per inbound frame, consumed once by a worker, and then
/// dropped. `did` is the ordering key: events of one account are handled in
/// arrival order.
#[derive(Debug, Clone)]
pub struct Event {
    /// Originating account (the ordering key).
    pub did: String,
    /// Upstream sequence time; the cursor unit.
    pub time_us: TimeUs,
    pub operation: Operation,
    /// Collection NSID of the record.
    pub collection: String,
    /// Record key within the collection.
    pub rkey: String,
    /// Undecoded record body.
    pub payload: Option<Box<RawValue>>,
}

impl Event {
    /// Build a create event from a record JSON string.
    pub fn create(
        did: impl Into<String>,
        time_us: TimeUs,
        collection: impl Into<String>,
        record_json: &str,
    ) -> Result<Self> {
        let record = RawValue::from_string(record_json.to_string())?;
        Ok(Self {
            did: did.into(),
            time_us,
            operation: Operation::Create,
            collection: collection.into(),
            rkey: format!("{time_us:x}"),
            payload: Some(record),
        })
    }

    /// Build a delete event (no payload).
    pub fn delete(did: impl Into<String>, time_us: TimeUs, collection: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            time_us,
            operation: Operation::Delete,
            collection: collection.into(),
            rkey: format!("{time_us:x}"),
            payload: None,
        }
    }

    /// Decode the payload into a typed [`Post`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingPayload`] if the event has no record, or a JSON
    /// error if the record does not match the post schema.
    pub fn decode_post(&self) -> Result<Post> {
        let raw = self.payload.as_ref().ok_or_else(|| Error::MissingPayload {
            did: self.did.clone(),
            time_us: self.time_us,
        })?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Wall-clock time at which upstream observed the event.
    pub fn observed_at(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.time_us).ok_or_else(|| Error::InvalidField {
            field: "time_us",
            reason: format!("{} is out of range", self.time_us),
        })
    }
}
