//! Per-event filter and publish stage.
//!
//! [`PostProcessor`] is the scheduler's handler. For every event it:
//!
//! 1. decodes the record into a [`Post`] (failures follow the [`DecodePolicy`]);
//! 2. runs the configured [`PostFilter`]s, returning early on the first reject;
//! 3. logs keyword matches;
//! 4. publishes the [`DerivedEvent`] keyed by the author's DID.
//!
//! Events without a record (deletes) have nothing to publish and succeed
//! immediately.

use super::filter::{KeywordMatcher, PostFilter};
use crate::publish::Publisher;
use crate::scheduler::EventHandler;
use crate::{Error, Result};
use creeper_core::{DerivedEvent, Event, Post};
use std::sync::Arc;

/// What to do with a record that does not decode as a post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DecodePolicy {
    /// Stop the pipeline. The process exits and restarts from the cursor.
    #[default]
    Fatal,
    /// Log the record and move on.
    Skip,
}

/// Result of processing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Published to the sink.
    Published,
    /// Rejected by the named filter.
    Filtered(&'static str),
    /// Not a post record, or undecodable under [`DecodePolicy::Skip`].
    Skipped,
}

/// Filter & publish handler.
pub struct PostProcessor<P> {
    publisher: Arc<P>,
    policy: DecodePolicy,
    filters: Vec<Box<dyn PostFilter>>,
    keywords: KeywordMatcher,
}

impl<P: Publisher> PostProcessor<P> {
    pub fn new(publisher: Arc<P>, policy: DecodePolicy) -> Self {
        Self {
            publisher,
            policy,
            filters: Vec::new(),
            keywords: KeywordMatcher::default(),
        }
    }

    /// Add a filter. Filters run in insertion order.
    pub fn with_filter(mut self, filter: impl PostFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Log posts containing any of these keywords.
    pub fn with_keywords(mut self, keywords: KeywordMatcher) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn publisher(&self) -> &Arc<P> {
        &self.publisher
    }

    /// Filter and publish one event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] for an undecodable record under
    /// [`DecodePolicy::Fatal`], or the publisher's error.
    pub async fn process(&self, event: &Event) -> Result<Outcome> {
        if event.payload.is_none() {
            tracing::trace!(did = %event.did, operation = ?event.operation, "No record, skipping");
            return Ok(Outcome::Skipped);
        }

        let post = match event.decode_post() {
            Ok(post) => post,
            Err(e) => return self.decode_failed(event, e),
        };

        if let Some(filter) = self.filters.iter().find(|f| !f.accept(&post)) {
            let reason = filter.name();
            metrics::counter!("publish_posts_filtered_total", "reason" => reason).increment(1);
            return Ok(Outcome::Filtered(reason));
        }

        self.log_keyword(event, &post);

        let derived = DerivedEvent::new(event, post)?;
        let value = derived.to_json()?;

        if let Err(e) = self.publisher.publish(derived.key(), value).await {
            metrics::counter!("publish_failures_total").increment(1);
            return Err(e);
        }

        metrics::counter!("publish_posts_total").increment(1);
        tracing::debug!(did = %event.did, time_us = event.time_us, "Post published");
        Ok(Outcome::Published)
    }

    fn decode_failed(&self, event: &Event, error: creeper_core::Error) -> Result<Outcome> {
        metrics::counter!("publish_decode_failures_total").increment(1);
        match self.policy {
            DecodePolicy::Skip => {
                tracing::warn!(
                    did = %event.did,
                    time_us = event.time_us,
                    rkey = %event.rkey,
                    error = %error,
                    "Undecodable post record, skipping"
                );
                Ok(Outcome::Skipped)
            }
            DecodePolicy::Fatal => Err(Error::Fatal(format!(
                "undecodable post record from {} at {}: {error}",
                event.did, event.time_us
            ))),
        }
    }

    fn log_keyword(&self, event: &Event, post: &Post) {
        if let Some(keyword) = self.keywords.find(&post.text) {
            metrics::counter!("publish_keyword_matches_total").increment(1);
            tracing::info!(
                did = %event.did,
                keyword,
                hashtags = ?post.hashtags(),
                text = %post.text,
                "Keyword match"
            );
        }
    }
}

impl<P: Publisher> EventHandler for PostProcessor<P> {
    async fn handle(&self, event: &Event) -> Result<()> {
        self.process(event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::LanguageFilter;
    use crate::publish::testing::RecordingPublisher;
    use creeper_core::POST_COLLECTION;
    use std::sync::atomic::Ordering;

    fn post_event(did: &str, time_us: i64, text: &str, langs: &str) -> Event {
        let record = format!(
            r#"{{"$type":"app.bsky.feed.post","createdAt":"2024-09-09T19:46:02.102Z","text":"{text}","langs":{langs}}}"#
        );
        Event::create(did, time_us, POST_COLLECTION, &record).unwrap()
    }

    fn processor(policy: DecodePolicy) -> PostProcessor<RecordingPublisher> {
        PostProcessor::new(Arc::new(RecordingPublisher::default()), policy)
            .with_filter(LanguageFilter::new(["en"]))
            .with_keywords(KeywordMatcher::new(["uwu", "owo"]))
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    #[tokio::test]
    async fn test_publishes_keyed_by_did() {
        let processor = processor(DecodePolicy::Fatal);
        let event = post_event("did:plc:alice", 1725911162329308, "hello uwu", r#"["en"]"#);

        assert_eq!(processor.process(&event).await.unwrap(), Outcome::Published);

        let publisher = processor.publisher();
        assert_eq!(publisher.keys(), vec!["did:plc:alice"]);
        let value = &publisher.values()[0];
        assert_eq!(value["Did"], "did:plc:alice");
        assert_eq!(value["Post"]["text"], "hello uwu");
        assert!(value["TimeUS"].as_str().unwrap().starts_with("2024-09-09T19:46:02"));
    }

    #[tokio::test]
    async fn test_filtered_post_is_not_published() {
        let processor = processor(DecodePolicy::Fatal);

        let french = post_event("did:plc:a", 1, "bonjour", r#"["fr"]"#);
        assert_eq!(
            processor.process(&french).await.unwrap(),
            Outcome::Filtered("language")
        );

        let untagged = post_event("did:plc:a", 2, "hi", "[]");
        assert_eq!(
            processor.process(&untagged).await.unwrap(),
            Outcome::Filtered("language")
        );

        assert!(processor.publisher().records.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_skipped() {
        let processor = processor(DecodePolicy::Fatal);
        let event = Event::delete("did:plc:a", 1, POST_COLLECTION);
        assert_eq!(processor.process(&event).await.unwrap(), Outcome::Skipped);
        assert!(processor.publisher().records.lock().is_empty());
    }

    #[tokio::test]
    async fn test_without_filters_everything_passes() {
        let processor = PostProcessor::new(
            Arc::new(RecordingPublisher::default()),
            DecodePolicy::Fatal,
        );
        let event = post_event("did:plc:a", 1, "no langs", "[]");
        assert_eq!(processor.process(&event).await.unwrap(), Outcome::Published);
    }

    // =========================================================================
    // Decode policy
    // =========================================================================

    #[tokio::test]
    async fn test_decode_failure_skip_policy() {
        let processor = processor(DecodePolicy::Skip);
        let event = Event::create("did:plc:a", 1, POST_COLLECTION, r#"{"text":42}"#).unwrap();

        assert_eq!(processor.process(&event).await.unwrap(), Outcome::Skipped);
        // The handler reports success, so the lane moves on
        assert!(processor.handle(&event).await.is_ok());
        assert!(processor.publisher().records.lock().is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_fatal_policy() {
        let processor = processor(DecodePolicy::Fatal);
        let event = Event::create("did:plc:a", 1, POST_COLLECTION, r#"{"text":42}"#).unwrap();

        let err = processor.process(&event).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("did:plc:a"));
    }

    // =========================================================================
    // Publish failures
    // =========================================================================

    #[tokio::test]
    async fn test_publish_failure_is_not_fatal() {
        let processor = processor(DecodePolicy::Fatal);
        processor.publisher().fail_next.store(1, Ordering::SeqCst);

        let event = post_event("did:plc:a", 1, "hi", r#"["en"]"#);
        let err = processor.handle(&event).await.unwrap_err();
        assert!(matches!(err, Error::Publish(_)));
        assert!(!err.is_fatal());

        // Next event goes through
        processor.handle(&event).await.unwrap();
        assert_eq!(processor.publisher().records.lock().len(), 1);
    }
}
