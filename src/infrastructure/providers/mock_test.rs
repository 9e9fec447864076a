use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;

use super::Mock;
use crate::domain::models::PayloadMessage;
use crate::domain::models::Provider;
use crate::domain::models::Role;
use crate::domain::models::SendPayload;
use crate::domain::services::read_to_string;

fn payload() -> SendPayload {
    return SendPayload::new(
        vec![PayloadMessage {
            role: Role::User,
            content: "Hello".to_string(),
        }],
        None,
        None,
    );
}

#[tokio::test]
async fn it_streams_the_fixed_token_list() -> Result<()> {
    let mock = Mock::new(Duration::ZERO, 0);
    let output = read_to_string(mock.stream_response(&payload()).await?).await?;

    assert_eq!(
        output,
        "Streaming mock response generated from local payload. Great for testing! \n"
    );

    return Ok(());
}

#[tokio::test]
async fn it_emits_one_chunk_per_token() -> Result<()> {
    let mock = Mock::new(Duration::ZERO, 0);
    let chunks = mock
        .stream_response(&payload())
        .await?
        .collect::<Vec<_>>()
        .await;

    assert_eq!(chunks.len(), 11);
    assert_eq!(chunks[0].as_ref().unwrap().as_ref(), b"Streaming ");
    assert_eq!(chunks[10].as_ref().unwrap().as_ref(), b"\n");

    return Ok(());
}

#[tokio::test(start_paused = true)]
async fn it_paces_tokens_with_jitter() -> Result<()> {
    let mock = Mock::new(Duration::from_millis(100), 50);
    let started = tokio::time::Instant::now();
    read_to_string(mock.stream_response(&payload()).await?).await?;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed <= Duration::from_millis(1500));

    return Ok(());
}

#[tokio::test]
async fn it_reports_no_usage() -> Result<()> {
    let mock = Mock::new(Duration::ZERO, 0);
    let (stream, usage) = mock.stream_response_with_usage(&payload()).await?.into_parts();
    read_to_string(stream).await?;

    assert_eq!(usage.get().await, None);

    return Ok(());
}
