use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use tokio::sync::oneshot;

use super::SendPayload;

/// Normalized provider output: plain incremental UTF-8 text with no framing.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderName {
    Mock,
    Mistral,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// A stream whose aggregate usage is only known once it has been drained.
pub struct UsageStream {
    pub stream: ByteStream,
    usage: oneshot::Receiver<Option<Usage>>,
}

impl UsageStream {
    pub fn new(stream: ByteStream, usage: oneshot::Receiver<Option<Usage>>) -> UsageStream {
        return UsageStream { stream, usage };
    }

    pub fn without_usage(stream: ByteStream) -> UsageStream {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(None);
        return UsageStream::new(stream, rx);
    }

    /// Splits into the byte stream and a handle resolving to the usage
    /// reported by the provider, if any.
    pub fn into_parts(self) -> (ByteStream, UsageHandle) {
        return (self.stream, UsageHandle { rx: self.usage });
    }
}

pub struct UsageHandle {
    rx: oneshot::Receiver<Option<Usage>>,
}

impl UsageHandle {
    pub async fn get(self) -> Option<Usage> {
        return self.rx.await.unwrap_or(None);
    }
}

#[async_trait]
pub trait Provider {
    fn name(&self) -> ProviderName;

    /// Produces the normalized byte stream for a chat payload.
    async fn stream_response(&self, payload: &SendPayload) -> Result<ByteStream>;

    /// Same as `stream_response`, with token usage retrievable after the
    /// stream completes. Used by evaluation runs.
    async fn stream_response_with_usage(&self, payload: &SendPayload) -> Result<UsageStream>;
}

pub type ProviderBox = Box<dyn Provider + Send + Sync>;
