//! JSON-lines publisher for development runs.

use super::Publisher;
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Writes each record value followed by a newline. Keys are not written.
pub struct LinePublisher<W> {
    writer: Mutex<W>,
    closed: AtomicBool,
}

/// [`LinePublisher`] over process stdout.
pub type StdoutPublisher = LinePublisher<tokio::io::Stdout>;

impl StdoutPublisher {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> LinePublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W> Publisher for LinePublisher<W>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    async fn publish(&self, _key: &[u8], mut value: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PublisherClosed);
        }
        value.push(b'\n');
        // One write per record keeps lines from interleaving
        self.writer.lock().await.write_all(&value).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::PublisherClosed);
        }
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}
