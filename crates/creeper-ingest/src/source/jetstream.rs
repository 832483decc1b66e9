//! Jetstream WebSocket connector.
//!
//! Subscribes to `wss://…/subscribe` with `wantedCollections`, `compress` and
//! `cursor` query parameters. Jetstream compresses frames with zstd against a
//! shared dictionary, so `compress` requires the dictionary file published
//! alongside the Jetstream server.

use super::Connector;
use crate::{Error, Result};
use creeper_core::{DEFAULT_JETSTREAM_URL, POST_COLLECTION, TimeUs};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, future};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use url::Url;
use zstd::dict::DecoderDictionary;

/// Configuration for the Jetstream connector.
#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    /// Subscribe endpoint.
    pub endpoint: String,

    /// Collections requested from the server. Empty means all.
    pub wanted_collections: Vec<String>,

    /// Request zstd-compressed frames.
    pub compress: bool,

    /// Path to the Jetstream zstd dictionary. Required when `compress` is set.
    pub zstd_dictionary: Option<PathBuf>,

    /// Maximum time for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_JETSTREAM_URL.to_string(),
            wanted_collections: vec![POST_COLLECTION.to_string()],
            compress: false,
            zstd_dictionary: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// [`Connector`] for a Jetstream instance.
pub struct JetstreamConnector {
    config: JetstreamConfig,
    dictionary: Option<Arc<DecoderDictionary<'static>>>,
}

impl JetstreamConnector {
    /// Create a connector, loading the zstd dictionary if compression is on.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is not a valid URL, or if compression is enabled
    /// without a readable dictionary.
    pub fn new(config: JetstreamConfig) -> Result<Self> {
        Url::parse(&config.endpoint)?;

        let dictionary = if config.compress {
            let path = config.zstd_dictionary.as_ref().ok_or_else(|| {
                Error::Config("compression requires a zstd dictionary path".to_string())
            })?;
            let bytes = std::fs::read(path)?;
            tracing::info!(path = %path.display(), bytes = bytes.len(), "Loaded zstd dictionary");
            Some(Arc::new(DecoderDictionary::copy(&bytes)))
        } else {
            None
        };

        Ok(Self { config, dictionary })
    }

    /// Build the subscribe URL for a connection resuming at `cursor`.
    pub fn subscribe_url(&self, cursor: Option<TimeUs>) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            for collection in &self.config.wanted_collections {
                query.append_pair("wantedCollections", collection);
            }
            if self.config.compress {
                query.append_pair("compress", "true");
            }
            if let Some(cursor) = cursor {
                query.append_pair("cursor", &cursor.to_string());
            }
        }
        Ok(url)
    }
}

impl Connector for JetstreamConnector {
    type Stream = BoxStream<'static, Result<Vec<u8>>>;

    async fn connect(&self, cursor: Option<TimeUs>) -> Result<Self::Stream> {
        let url = self.subscribe_url(cursor)?;
        tracing::info!(url = %url, "Connecting to Jetstream");

        let (ws, _response) =
            tokio::time::timeout(self.config.connect_timeout, tokio_tungstenite::connect_async(url.as_str()))
                .await
                .map_err(|_| {
                    Error::Transport(format!(
                        "handshake timed out after {:?}",
                        self.config.connect_timeout
                    ))
                })??;

        let dictionary = self.dictionary.clone();
        let frames = ws.filter_map(move |message| {
            let frame = match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_bytes().to_vec())),
                Ok(Message::Binary(data)) => Some(match &dictionary {
                    Some(dictionary) => decompress(&data, dictionary),
                    None => Ok(data.to_vec()),
                }),
                Ok(Message::Close(close)) => {
                    tracing::info!(?close, "Jetstream sent Close frame");
                    None
                }
                // Ping/Pong are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(Error::WebSocket(e))),
            };
            future::ready(frame)
        });

        Ok(frames.boxed())
    }
}

/// Decompress one zstd frame against the Jetstream dictionary.
fn decompress(data: &[u8], dictionary: &DecoderDictionary<'static>) -> Result<Vec<u8>> {
    let mut decoder = zstd::stream::read::Decoder::with_prepared_dictionary(data, dictionary)?;
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_url_live() {
        let connector = JetstreamConnector::new(JetstreamConfig::default()).unwrap();
        let url = connector.subscribe_url(None).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://jetstream.atproto.tools/subscribe?wantedCollections=app.bsky.feed.post"
        );
    }

    #[test]
    fn test_subscribe_url_with_cursor() {
        let connector = JetstreamConnector::new(JetstreamConfig {
            wanted_collections: vec![
                "app.bsky.feed.post".to_string(),
                "app.bsky.feed.like".to_string(),
            ],
            ..Default::default()
        })
        .unwrap();

        let url = connector.subscribe_url(Some(1725911162329308)).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("wantedCollections".to_string(), "app.bsky.feed.post".to_string()),
                ("wantedCollections".to_string(), "app.bsky.feed.like".to_string()),
                ("cursor".to_string(), "1725911162329308".to_string()),
            ]
        );
    }

    #[test]
    fn test_compress_requires_dictionary() {
        let result = JetstreamConnector::new(JetstreamConfig {
            compress: true,
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = JetstreamConnector::new(JetstreamConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::Url(_))));
    }

    #[test]
    fn test_decompress_with_dictionary() {
        let dict_bytes = b"app.bsky.feed.post did:plc: time_us commit collection operation create".repeat(8);
        let payload = br#"{"did":"did:plc:abc","time_us":1,"kind":"commit"}"#;

        let mut encoder =
            zstd::stream::write::Encoder::with_dictionary(Vec::new(), 3, &dict_bytes).unwrap();
        std::io::Write::write_all(&mut encoder, payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let dictionary = DecoderDictionary::copy(&dict_bytes);
        assert_eq!(decompress(&compressed, &dictionary).unwrap(), payload);
    }
}
