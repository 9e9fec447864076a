#[cfg(test)]
#[path = "mistral_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_stream::wrappers::ReceiverStream;

use crate::configuration::ServerEnv;
use crate::domain::models::ByteStream;
use crate::domain::models::PayloadMessage;
use crate::domain::models::Provider;
use crate::domain::models::ProviderName;
use crate::domain::models::SendPayload;
use crate::domain::models::Usage;
use crate::domain::models::UsageStream;
use crate::domain::services::EventStreamDecoder;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct CompletionRequest<'a> {
    model: String,
    messages: &'a [PayloadMessage],
    temperature: f64,
    stream: bool,
}

pub struct Mistral {
    url: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl Mistral {
    pub fn new(url: &str, api_key: &str, model: &str, temperature: f64) -> Mistral {
        return Mistral {
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        };
    }

    pub fn from_env(env: &ServerEnv) -> Result<Mistral> {
        let api_key = match &env.mistral_api_key {
            Some(api_key) => api_key,
            None => bail!("MISTRAL_API_KEY missing"),
        };

        return Ok(Mistral::new(&env.mistral_url, api_key, &env.model, env.temperature));
    }

    /// Opens the upstream request, then pumps its event stream through the
    /// decoder on a background task. Upstream usage is handed to `usage_tx`
    /// once the body ends.
    async fn open(
        &self,
        payload: &SendPayload,
        usage_tx: oneshot::Sender<Option<Usage>>,
    ) -> Result<ByteStream> {
        let req = CompletionRequest {
            model: payload
                .model
                .clone()
                .filter(|model| return !model.is_empty())
                .unwrap_or_else(|| return self.model.to_string()),
            messages: &payload.messages,
            temperature: payload.temperature.unwrap_or(self.temperature),
            stream: true,
        };
        tracing::debug!(
            model = req.model,
            temperature = req.temperature,
            messages = req.messages.len(),
            "Mistral completion request"
        );

        let res = reqwest::Client::new()
            .post(format!("{url}/v1/chat/completions", url = self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "text/event-stream")
            .json(&req)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                body = body,
                "Mistral streaming request failed"
            );
            if body.trim().is_empty() {
                bail!("Mistral streaming failed with status {}", status.as_u16());
            }
            bail!(body);
        }

        let mut upstream = res.bytes_stream();
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(16);

        tokio::spawn(async move {
            let mut decoder = EventStreamDecoder::default();
            while let Some(chunk) = upstream.next().await {
                let increments = match chunk {
                    Ok(chunk) => decoder.push(&chunk),
                    Err(err) => Err(err.into()),
                };
                if !forward(&tx, increments).await {
                    return;
                }
            }

            if forward(&tx, decoder.finish()).await {
                let _ = usage_tx.send(decoder.usage().cloned());
            }
        });

        return Ok(ReceiverStream::new(rx).boxed());
    }
}

/// Sends decoded increments downstream. Returns false once the stream should
/// stop, either on error or because the receiver went away.
async fn forward(tx: &mpsc::Sender<Result<Bytes>>, increments: Result<Vec<String>>) -> bool {
    match increments {
        Ok(increments) => {
            for text in increments {
                if tx.send(Ok(Bytes::from(text))).await.is_err() {
                    tracing::debug!("Mistral stream receiver dropped");
                    return false;
                }
            }

            return true;
        }
        Err(err) => {
            tracing::error!(error = ?err, "Mistral stream failed");
            let _ = tx.send(Err(err)).await;
            return false;
        }
    }
}

#[async_trait]
impl Provider for Mistral {
    fn name(&self) -> ProviderName {
        return ProviderName::Mistral;
    }

    async fn stream_response(&self, payload: &SendPayload) -> Result<ByteStream> {
        let (usage_tx, _) = oneshot::channel();
        return self.open(payload, usage_tx).await;
    }

    async fn stream_response_with_usage(&self, payload: &SendPayload) -> Result<UsageStream> {
        let (usage_tx, usage_rx) = oneshot::channel();
        let stream = self.open(payload, usage_tx).await?;
        return Ok(UsageStream::new(stream, usage_rx));
    }
}
