//! Command-line and environment configuration for the ingestion daemon.
//!
//! Every flag can also be set through an environment variable. The broker
//! and environment variables keep their bare names (`ENV`, `KAFKA_ADDRESS`,
//! `KAFKA_PORT`) so existing deployments keep working; everything else is
//! prefixed with `CREEPER_`.

use crate::pipeline::{DecodePolicy, KeywordMatcher, LanguageFilter, PostProcessor};
use crate::publish::Publisher;
use crate::scheduler::SchedulerConfig;
use crate::source::{JetstreamConfig, ReaderConfig, ReconnectConfig};
use crate::{IngestorConfig, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use creeper_core::{DEFAULT_JETSTREAM_URL, POST_COLLECTION, TimeUs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Environment {
    /// Human-readable logs.
    #[default]
    Dev,
    /// JSON logs.
    Prod,
}

/// Where derived events go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    Kafka,
    /// JSON lines on stdout.
    Stdout,
}

impl Default for SinkKind {
    /// Kafka when the publisher is compiled in, stdout otherwise.
    fn default() -> Self {
        if cfg!(feature = "kafka") {
            Self::Kafka
        } else {
            Self::Stdout
        }
    }
}

/// Bluesky Jetstream ingestor.
#[derive(Parser, Debug, Clone)]
#[command(name = "creeper-ingest")]
#[command(about = "Stream Bluesky posts from Jetstream into Kafka")]
#[command(version)]
pub struct Args {
    /// Environment (dev or prod)
    #[arg(long, env = "ENV", value_enum, default_value_t = Environment::Dev)]
    pub env: Environment,

    /// Kafka broker address
    #[arg(long, env = "KAFKA_ADDRESS", default_value = "localhost")]
    pub kafka_address: String,

    /// Kafka broker port
    #[arg(long, env = "KAFKA_PORT", default_value_t = 9092)]
    pub kafka_port: u16,

    /// Kafka topic for derived posts
    #[arg(long, env = "CREEPER_KAFKA_TOPIC", default_value = "raw-posts")]
    pub kafka_topic: String,

    /// Kafka batching delay in milliseconds
    #[arg(long, env = "CREEPER_KAFKA_LINGER_MS", default_value_t = 500)]
    pub kafka_linger_ms: u64,

    /// Output sink
    #[arg(long, env = "CREEPER_SINK", value_enum, default_value_t = SinkKind::default())]
    pub sink: SinkKind,

    /// Jetstream subscribe endpoint
    #[arg(long, env = "CREEPER_JETSTREAM_URL", default_value = DEFAULT_JETSTREAM_URL)]
    pub jetstream_url: String,

    /// Collections to subscribe to (comma-separated)
    #[arg(
        long,
        env = "CREEPER_WANTED_COLLECTIONS",
        value_delimiter = ',',
        default_value = POST_COLLECTION
    )]
    pub wanted_collections: Vec<String>,

    /// Request zstd-compressed frames (needs --zstd-dictionary)
    #[arg(long, env = "CREEPER_COMPRESS")]
    pub compress: bool,

    /// Path to the Jetstream zstd dictionary
    #[arg(long, env = "CREEPER_ZSTD_DICTIONARY")]
    pub zstd_dictionary: Option<PathBuf>,

    /// Hours of history to replay on startup (0 = live only)
    #[arg(long, env = "CREEPER_BACKFILL_HOURS", default_value_t = 8)]
    pub backfill_hours: u32,

    /// Number of scheduler lanes (concurrent handlers)
    #[arg(long, env = "CREEPER_WORKERS", default_value_t = 250)]
    pub workers: usize,

    /// Queue capacity per lane
    #[arg(long, env = "CREEPER_LANE_CAPACITY", default_value_t = 100)]
    pub lane_capacity: usize,

    /// Accepted post languages (comma-separated)
    #[arg(long, env = "CREEPER_LANGUAGES", value_delimiter = ',', default_value = "en")]
    pub languages: Vec<String>,

    /// Keywords whose matches are logged (comma-separated)
    #[arg(long, env = "CREEPER_KEYWORDS", value_delimiter = ',', default_value = "uwu,owo")]
    pub keywords: Vec<String>,

    /// What to do with records that do not decode as posts
    #[arg(long, env = "CREEPER_DECODE_POLICY", value_enum, default_value_t = DecodePolicy::Fatal)]
    pub decode_policy: DecodePolicy,

    /// Seconds to wait for lanes to drain on shutdown
    #[arg(long, env = "CREEPER_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "CREEPER_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,
}

impl Args {
    /// Cursor for the first connection: `now - backfill`, or live when zero.
    pub fn initial_cursor(&self, now: DateTime<Utc>) -> Option<TimeUs> {
        if self.backfill_hours == 0 {
            return None;
        }
        let start = now - chrono::Duration::hours(i64::from(self.backfill_hours));
        Some(start.timestamp_micros())
    }

    pub fn jetstream_config(&self) -> JetstreamConfig {
        JetstreamConfig {
            endpoint: self.jetstream_url.clone(),
            wanted_collections: self.wanted_collections.clone(),
            compress: self.compress,
            zstd_dictionary: self.zstd_dictionary.clone(),
            ..Default::default()
        }
    }

    pub fn ingestor_config(&self, now: DateTime<Utc>) -> IngestorConfig {
        IngestorConfig {
            scheduler: SchedulerConfig {
                workers: self.workers,
                lane_capacity: self.lane_capacity,
            },
            reader: ReaderConfig {
                wanted_collections: self.wanted_collections.iter().cloned().collect(),
                reconnect: ReconnectConfig::default(),
            },
            initial_cursor: self.initial_cursor(now),
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
        }
    }

    /// Build the filter & publish handler around `publisher`.
    pub fn processor<P: Publisher>(&self, publisher: Arc<P>) -> PostProcessor<P> {
        PostProcessor::new(publisher, self.decode_policy)
            .with_filter(LanguageFilter::new(&self.languages))
            .with_keywords(KeywordMatcher::new(&self.keywords))
    }

    #[cfg(feature = "kafka")]
    pub fn kafka_config(&self) -> crate::publish::KafkaConfig {
        crate::publish::KafkaConfig {
            address: self.kafka_address.clone(),
            port: self.kafka_port,
            topic: self.kafka_topic.clone(),
            linger: Duration::from_millis(self.kafka_linger_ms),
            ..Default::default()
        }
    }

    /// Reject combinations that cannot work before anything is started.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(crate::Error::Config("--workers must be at least 1".to_string()));
        }
        if self.compress && self.zstd_dictionary.is_none() {
            return Err(crate::Error::Config(
                "--compress requires --zstd-dictionary".to_string(),
            ));
        }
        if cfg!(not(feature = "kafka")) && self.sink == SinkKind::Kafka {
            return Err(crate::Error::Config(
                "built without Kafka support; rebuild with --features kafka or use --sink stdout"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("creeper-ingest").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.env, Environment::Dev);
        assert_eq!(args.kafka_address, "localhost");
        assert_eq!(args.kafka_port, 9092);
        assert_eq!(args.kafka_topic, "raw-posts");
        assert_eq!(args.wanted_collections, vec![POST_COLLECTION]);
        assert_eq!(args.languages, vec!["en"]);
        assert_eq!(args.keywords, vec!["uwu", "owo"]);
        assert_eq!(args.workers, 250);
        assert_eq!(args.backfill_hours, 8);
        assert_eq!(args.decode_policy, DecodePolicy::Fatal);
    }

    #[test]
    fn test_flags() {
        let args = parse(&[
            "--env",
            "prod",
            "--sink",
            "stdout",
            "--languages",
            "en,ja",
            "--decode-policy",
            "skip",
            "--workers",
            "8",
        ]);
        assert_eq!(args.env, Environment::Prod);
        assert_eq!(args.sink, SinkKind::Stdout);
        assert_eq!(args.languages, vec!["en", "ja"]);
        assert_eq!(args.decode_policy, DecodePolicy::Skip);
        assert_eq!(args.ingestor_config(Utc::now()).scheduler.workers, 8);
    }

    #[test]
    fn test_initial_cursor() {
        let now = Utc.with_ymd_and_hms(2024, 9, 9, 20, 0, 0).unwrap();

        let args = parse(&[]);
        let expected = Utc.with_ymd_and_hms(2024, 9, 9, 12, 0, 0).unwrap();
        assert_eq!(args.initial_cursor(now), Some(expected.timestamp_micros()));

        let live = parse(&["--backfill-hours", "0"]);
        assert_eq!(live.initial_cursor(now), None);
    }

    #[test]
    fn test_default_invocation_is_valid() {
        let args = parse(&[]);
        assert_eq!(args.sink, SinkKind::default());
        assert!(args.validate().is_ok());
    }

    #[cfg(feature = "kafka")]
    #[test]
    fn test_default_sink_is_kafka() {
        let args = parse(&[]);
        assert_eq!(args.sink, SinkKind::Kafka);
        assert_eq!(args.kafka_config().bootstrap_servers(), "localhost:9092");
    }

    #[cfg(not(feature = "kafka"))]
    #[test]
    fn test_kafka_sink_rejected_without_support() {
        assert_eq!(parse(&[]).sink, SinkKind::Stdout);
        assert!(parse(&["--sink", "kafka"]).validate().is_err());
    }

    #[test]
    fn test_validate() {
        assert!(parse(&["--sink", "stdout"]).validate().is_ok());
        assert!(parse(&["--sink", "stdout", "--compress"]).validate().is_err());
        assert!(parse(&["--sink", "stdout", "--workers", "0"]).validate().is_err());
    }
}
