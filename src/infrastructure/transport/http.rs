#[cfg(test)]
#[path = "http_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use futures::TryStreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::models::ChatError;
use crate::domain::models::ChatTransport;
use crate::domain::models::EvalRequest;
use crate::domain::models::EvalResponse;
use crate::domain::models::PartialSettings;
use crate::domain::models::ResponseStream;
use crate::domain::models::SendPayload;

fn convert_err(err: reqwest::Error) -> ChatError {
    return ChatError::Transport(err.to_string());
}

/// Extracts a human readable message from an error response body: a bare
/// JSON string, the `error` field of a JSON object, or the raw text.
pub fn safe_parse_error(status: u16, text: &str) -> String {
    if text.trim().is_empty() {
        return format!("Request failed with status {status}");
    }

    match serde_json::from_str::<Value>(text) {
        Ok(Value::String(message)) => return message,
        Ok(Value::Object(obj)) => {
            if let Some(Value::String(message)) = obj.get("error") {
                if !message.is_empty() {
                    return message.to_string();
                }
            }

            return text.to_string();
        }
        _ => return text.to_string(),
    }
}

/// Settings advertised by the config endpoint. Only a non-empty string model
/// and a numeric temperature are taken.
pub fn parse_config(body: &Value) -> PartialSettings {
    let model = body
        .get("model")
        .and_then(|model| return model.as_str())
        .filter(|model| return !model.is_empty())
        .map(|model| return model.to_string());
    let temperature = body.get("temperature").and_then(|val| return val.as_f64());

    return PartialSettings { model, temperature };
}

/// Talks to a running server's chat endpoints.
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> HttpTransport {
        return HttpTransport {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        };
    }

    pub fn base_url(&self) -> &str {
        return &self.base_url;
    }

    /// Runs an evaluation on the server and waits for the whole report.
    pub async fn run_eval(&self, req: &EvalRequest) -> Result<EvalResponse> {
        let res = self
            .client
            .post(format!("{url}/api/eval/run", url = self.base_url))
            .json(req)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            bail!(safe_parse_error(status.as_u16(), &text));
        }

        return Ok(res.json::<EvalResponse>().await?);
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(
        &self,
        payload: &SendPayload,
        cancel: CancellationToken,
    ) -> Result<ResponseStream, ChatError> {
        let req = self
            .client
            .post(format!("{url}/api/chat/stream", url = self.base_url))
            .json(payload)
            .send();

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Aborted),
            res = req => res.map_err(convert_err)?,
        };

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let message = safe_parse_error(status.as_u16(), &text);
            tracing::warn!(
                status = status.as_u16(),
                message = message,
                "Chat stream request failed"
            );
            return Err(ChatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let stream = res
            .bytes_stream()
            .map_err(convert_err)
            .take_until(cancel.cancelled_owned());

        return Ok(stream.boxed());
    }

    async fn fetch_config(&self) -> Result<PartialSettings, ChatError> {
        let res = self
            .client
            .get(format!("{url}/api/chat/config", url = self.base_url))
            .send()
            .await
            .map_err(convert_err)?;

        let status = res.status();
        if !status.is_success() {
            return Err(ChatError::Status {
                status: status.as_u16(),
                message: format!("Request failed with status {}", status.as_u16()),
            });
        }

        let body = res
            .json::<Value>()
            .await
            .map_err(|err| return ChatError::Decode(err.to_string()))?;

        return Ok(parse_config(&body));
    }
}
