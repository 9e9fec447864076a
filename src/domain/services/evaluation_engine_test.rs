use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use test_utils::dataset_fixture;
use tokio::sync::oneshot;

use super::parse_dataset;
use super::snippet;
use super::EvalTarget;
use super::EvaluationEngine;
use crate::domain::models::ByteStream;
use crate::domain::models::EvalRequest;
use crate::domain::models::MatchMode;
use crate::domain::models::Provider;
use crate::domain::models::ProviderName;
use crate::domain::models::RunMode;
use crate::domain::models::SendPayload;
use crate::domain::models::Usage;
use crate::domain::models::UsageStream;

/// Answers from a lookup keyed on the user prompt, tracking how many calls
/// overlap.
#[derive(Default)]
struct LookupProvider {
    answers: HashMap<String, String>,
    tokens: Option<u64>,
    delay: Option<Duration>,
    running: AtomicUsize,
    peak: AtomicUsize,
    payloads: std::sync::Mutex<Vec<SendPayload>>,
}

impl LookupProvider {
    fn answering(answers: &[(&str, &str)]) -> LookupProvider {
        return LookupProvider {
            answers: answers
                .iter()
                .map(|(user, output)| return (user.to_string(), output.to_string()))
                .collect(),
            ..LookupProvider::default()
        };
    }

    async fn answer(&self, payload: &SendPayload) -> Result<String> {
        self.payloads.lock().unwrap().push(payload.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let user = payload.messages.last().unwrap().content.to_string();
        if user == "explode" {
            bail!("Upstream unavailable");
        }

        return Ok(self.answers.get(&user).cloned().unwrap_or_default());
    }
}

#[async_trait]
impl Provider for LookupProvider {
    fn name(&self) -> ProviderName {
        return ProviderName::Mock;
    }

    async fn stream_response(&self, payload: &SendPayload) -> Result<ByteStream> {
        let output = self.answer(payload).await?;
        return Ok(stream::iter(vec![Ok(Bytes::from(output))]).boxed());
    }

    async fn stream_response_with_usage(&self, payload: &SendPayload) -> Result<UsageStream> {
        let stream = self.stream_response(payload).await?;
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(self.tokens.map(|total| {
            return Usage {
                total_tokens: Some(total),
                ..Usage::default()
            };
        }));

        return Ok(UsageStream::new(stream, rx));
    }
}

fn request(dataset: &str) -> EvalRequest {
    return EvalRequest {
        dataset: dataset.to_string(),
        prompt_a: None,
        prompt_b: None,
        model: None,
        temperature: None,
    };
}

fn engine_with(datasets: &[(&str, &str)]) -> Result<(EvaluationEngine, tempfile::TempDir)> {
    let tmp_dir = tempfile::tempdir()?;
    for (name, content) in datasets {
        std::fs::write(tmp_dir.path().join(format!("{name}.jsonl")), content)?;
    }

    return Ok((EvaluationEngine::new(tmp_dir.path().to_path_buf()), tmp_dir));
}

fn target(provider: &LookupProvider, mode: RunMode) -> EvalTarget<'_> {
    return EvalTarget {
        provider,
        mode,
        default_model: "mistral-small".to_string(),
    };
}

mod datasets {
    use super::*;

    #[test]
    fn it_parses_items_and_skips_blank_lines() -> Result<()> {
        let items = parse_dataset(dataset_fixture())?;

        assert_eq!(items.len(), 4);
        assert_eq!(items[0].id, "math-1");
        assert_eq!(items[2].expect_contains, vec!["red", "blue", "yellow"]);
        assert_eq!(items[3].match_mode, Some(MatchMode::Any));
        assert_eq!(items[0].match_mode, None);

        return Ok(());
    }

    #[tokio::test]
    async fn it_fails_the_whole_dataset_on_a_malformed_line() -> Result<()> {
        let (engine, _tmp) = engine_with(&[(
            "broken",
            "{\"id\":\"1\",\"user\":\"hi\",\"expect_contains\":[]}\n{\"id\":2}\n",
        )])?;

        let err = engine.load_dataset("broken").await.unwrap_err().to_string();
        assert!(err.starts_with("Failed to load dataset broken: line 2"));

        return Ok(());
    }

    #[tokio::test]
    async fn it_fails_for_missing_datasets() -> Result<()> {
        let (engine, _tmp) = engine_with(&[])?;

        let err = engine.load_dataset("nowhere").await.unwrap_err().to_string();
        assert!(err.starts_with("Failed to load dataset nowhere: "));

        return Ok(());
    }

    #[tokio::test]
    async fn it_rejects_path_like_names() -> Result<()> {
        let (engine, _tmp) = engine_with(&[])?;

        let err = engine.load_dataset("../secrets").await.unwrap_err().to_string();
        assert_eq!(err, "Failed to load dataset ../secrets: invalid dataset name");

        return Ok(());
    }
}

mod runs {
    use super::*;

    #[test]
    fn it_truncates_long_outputs_into_snippets() {
        assert_eq!(snippet("short"), "short");
        assert_eq!(snippet(&"a".repeat(100)), "a".repeat(100));

        let long = "é".repeat(150);
        assert_eq!(snippet(&long), format!("{}...", "é".repeat(100)));
    }

    #[tokio::test]
    async fn it_scores_each_item_in_dataset_order() -> Result<()> {
        let (engine, _tmp) = engine_with(&[("sanity", dataset_fixture())])?;
        let provider = LookupProvider::answering(&[
            ("What is 2 + 2?", "The answer is 4."),
            ("Describe yourself.", "Streaming mock response"),
            ("Name a primary color.", "Blue, obviously."),
            ("Say hello.", "Hello!"),
        ]);

        let res = engine
            .run(&request("sanity"), &target(&provider, RunMode::Mock))
            .await?;

        assert_eq!(res.mode, RunMode::Mock);
        assert_eq!(res.model, "mock-model");
        assert_eq!(res.count, 4);
        assert!(res.results_b.is_none());
        assert!(res.summary.b.is_none());

        let outcome = res
            .results_a
            .iter()
            .map(|result| return (result.id.as_str(), result.pass))
            .collect::<Vec<(&str, bool)>>();
        assert_eq!(
            outcome,
            vec![
                ("math-1", true),
                ("mock-1", true),
                ("colors-1", true),
                ("explicit-1", false),
            ]
        );
        assert_eq!(res.summary.a.count, 4);
        assert_eq!(res.summary.a.pass_rate, 0.75);
        assert_eq!(res.summary.a.total_tokens, None);

        return Ok(());
    }

    #[tokio::test]
    async fn it_runs_prompt_b_after_prompt_a() -> Result<()> {
        let (engine, _tmp) = engine_with(&[("sanity", dataset_fixture())])?;
        let provider = LookupProvider::answering(&[]);

        let mut req = request("sanity");
        req.prompt_a = Some("You are A.".to_string());
        req.prompt_b = Some("You are B.".to_string());
        req.model = Some("custom".to_string());
        req.temperature = Some(0.2);

        let res = engine.run(&req, &target(&provider, RunMode::Real)).await?;
        assert_eq!(res.model, "custom");
        assert_eq!(res.results_b.as_ref().map(|results| return results.len()), Some(4));
        assert_eq!(res.summary.b.as_ref().map(|summary| return summary.count), Some(4));

        let payloads = provider.payloads.lock().unwrap().clone();
        assert_eq!(payloads.len(), 8);
        assert!(payloads[..4]
            .iter()
            .all(|payload| return payload.messages[0].content == "You are A."));
        assert!(payloads[4..]
            .iter()
            .all(|payload| return payload.messages[0].content == "You are B."));
        assert_eq!(payloads[0].model, Some("custom".to_string()));
        assert_eq!(payloads[0].temperature, Some(0.2));

        return Ok(());
    }

    #[tokio::test]
    async fn it_sends_only_the_user_message_without_a_system_prompt() -> Result<()> {
        let (engine, _tmp) = engine_with(&[("sanity", dataset_fixture())])?;
        let provider = LookupProvider::answering(&[]);

        let res = engine
            .run(&request("sanity"), &target(&provider, RunMode::Real))
            .await?;
        assert_eq!(res.model, "mistral-small");

        let payloads = provider.payloads.lock().unwrap().clone();
        assert!(payloads.iter().all(|payload| return payload.messages.len() == 1));
        assert_eq!(payloads[0].model, None);

        return Ok(());
    }

    #[tokio::test]
    async fn it_reports_token_usage_when_available() -> Result<()> {
        let (engine, _tmp) = engine_with(&[("sanity", dataset_fixture())])?;
        let mut provider = LookupProvider::answering(&[]);
        provider.tokens = Some(10);

        let res = engine
            .run(&request("sanity"), &target(&provider, RunMode::Real))
            .await?;

        assert!(res
            .results_a
            .iter()
            .all(|result| return result.tokens_used == Some(10)));
        assert_eq!(res.summary.a.total_tokens, Some(40));
        assert_eq!(res.summary.a.avg_tokens, Some(10.0));

        return Ok(());
    }

    #[tokio::test]
    async fn it_limits_concurrent_items() -> Result<()> {
        let dataset = (0..9)
            .map(|idx| {
                return format!(r#"{{"id":"item-{idx}","user":"q{idx}","expect_contains":[]}}"#);
            })
            .collect::<Vec<String>>()
            .join("\n");
        let (engine, _tmp) = engine_with(&[("wide", &dataset)])?;
        let mut provider = LookupProvider::answering(&[]);
        provider.delay = Some(Duration::from_millis(10));

        let res = engine
            .run(&request("wide"), &target(&provider, RunMode::Mock))
            .await?;

        assert_eq!(res.count, 9);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 3);
        assert_eq!(engine.gate().running(), 0);
        assert_eq!(
            res.results_a
                .iter()
                .map(|result| return result.id.to_string())
                .collect::<Vec<String>>(),
            (0..9).map(|idx| return format!("item-{idx}")).collect::<Vec<String>>()
        );

        return Ok(());
    }

    #[tokio::test]
    async fn it_fails_when_an_item_fails() -> Result<()> {
        let (engine, _tmp) = engine_with(&[(
            "boom",
            r#"{"id":"1","user":"explode","expect_contains":[]}"#,
        )])?;
        let provider = LookupProvider::answering(&[]);

        let err = engine
            .run(&request("boom"), &target(&provider, RunMode::Real))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Upstream unavailable");

        return Ok(());
    }
}
