#[cfg(test)]
#[path = "mock_test.rs"]
mod tests;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::configuration::ServerEnv;
use crate::domain::models::ByteStream;
use crate::domain::models::Provider;
use crate::domain::models::ProviderName;
use crate::domain::models::SendPayload;
use crate::domain::models::UsageStream;

pub const MOCK_TOKENS: [&str; 10] = [
    "Streaming",
    "mock",
    "response",
    "generated",
    "from",
    "local",
    "payload.",
    "Great",
    "for",
    "testing!",
];

/// Deterministic local generator. Ignores the payload and streams a fixed
/// token list, one token per tick.
pub struct Mock {
    delay: Duration,
    jitter_ms: u64,
}

impl Default for Mock {
    fn default() -> Mock {
        return Mock::new(Duration::from_millis(120), 0);
    }
}

impl Mock {
    pub fn new(delay: Duration, jitter_ms: u64) -> Mock {
        return Mock { delay, jitter_ms };
    }

    pub fn from_env(env: &ServerEnv) -> Mock {
        return Mock::new(Duration::from_millis(env.mock_delay_ms), env.mock_jitter_ms);
    }

    fn tick(&self) -> Duration {
        if self.jitter_ms == 0 {
            return self.delay;
        }

        let jitter = rand::thread_rng().gen_range(0..=self.jitter_ms);
        return self.delay + Duration::from_millis(jitter);
    }
}

#[async_trait]
impl Provider for Mock {
    fn name(&self) -> ProviderName {
        return ProviderName::Mock;
    }

    async fn stream_response(&self, _payload: &SendPayload) -> Result<ByteStream> {
        let ticks = MOCK_TOKENS
            .iter()
            .map(|_| return self.tick())
            .collect::<Vec<Duration>>();
        let (tx, rx) = mpsc::channel::<Result<Bytes>>(1);

        tokio::spawn(async move {
            for (token, tick) in MOCK_TOKENS.iter().zip(ticks) {
                if tx.send(Ok(Bytes::from(format!("{token} ")))).await.is_err() {
                    tracing::debug!("Mock stream receiver dropped");
                    return;
                }
                tokio::time::sleep(tick).await;
            }
            let _ = tx.send(Ok(Bytes::from("\n"))).await;
        });

        return Ok(ReceiverStream::new(rx).boxed());
    }

    async fn stream_response_with_usage(&self, payload: &SendPayload) -> Result<UsageStream> {
        let stream = self.stream_response(payload).await?;
        return Ok(UsageStream::without_usage(stream));
    }
}
