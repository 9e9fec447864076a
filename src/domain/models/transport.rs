use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use super::PartialSettings;
use super::SendPayload;

/// Failures surfaced to a chat session. Everything except `Aborted` ends up
/// on the session's error field.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("{0}")]
    Transport(String),
    #[error("{0}")]
    Decode(String),
    #[error("Request aborted")]
    Aborted,
    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    pub fn is_abort(&self) -> bool {
        return *self == ChatError::Aborted;
    }
}

pub type ResponseStream = BoxStream<'static, Result<Bytes, ChatError>>;

/// The HTTP boundary between a chat session and the streaming endpoint.
#[async_trait]
pub trait ChatTransport {
    /// Issues the streaming request and resolves once response headers are
    /// in. Non-success responses resolve to `ChatError::Status`. The returned
    /// stream must end promptly once `cancel` fires.
    async fn open_stream(
        &self,
        payload: &SendPayload,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, ChatError>;

    /// Reads the server's advertised defaults. Display only.
    async fn fetch_config(&self) -> Result<PartialSettings, ChatError>;
}

pub type TransportBox = Arc<dyn ChatTransport + Send + Sync>;
