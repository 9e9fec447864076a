#[cfg(test)]
#[path = "evaluation_engine_test.rs"]
mod tests;

use std::path;
use std::time::Instant;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;
use futures::future::try_join_all;
use tokio::fs;

use super::compute_stats;
use super::read_to_string;
use super::score_contains_all;
use super::score_with_mode;
use super::AdmissionGate;
use crate::domain::models::DatasetItem;
use crate::domain::models::EvalRequest;
use crate::domain::models::EvalResponse;
use crate::domain::models::EvalResult;
use crate::domain::models::PayloadMessage;
use crate::domain::models::Provider;
use crate::domain::models::Role;
use crate::domain::models::RunMode;
use crate::domain::models::Sample;
use crate::domain::models::SendPayload;
use crate::domain::models::SummaryPair;

pub const EVAL_CONCURRENCY: usize = 3;
pub const SNIPPET_CHARS: usize = 100;
pub const MOCK_MODEL_NAME: &str = "mock-model";

pub fn snippet(output: &str) -> String {
    if output.chars().count() <= SNIPPET_CHARS {
        return output.to_string();
    }

    return format!("{}...", output.chars().take(SNIPPET_CHARS).collect::<String>());
}

fn is_valid_dataset_name(name: &str) -> bool {
    return !name.is_empty()
        && name
            .chars()
            .all(|c| return c.is_ascii_alphanumeric() || c == '_' || c == '-');
}

/// Parses newline delimited dataset items. Blank lines are skipped, any other
/// malformed line fails the whole dataset.
pub fn parse_dataset(content: &str) -> Result<Vec<DatasetItem>> {
    return content
        .lines()
        .enumerate()
        .filter(|(_, line)| return !line.trim().is_empty())
        .map(|(idx, line)| {
            return serde_json::from_str::<DatasetItem>(line)
                .map_err(|err| return anyhow!("line {}: {err}", idx + 1));
        })
        .collect();
}

/// Which provider answers, and how the response reports it.
pub struct EvalTarget<'a> {
    pub provider: &'a (dyn Provider + Send + Sync),
    pub mode: RunMode,
    pub default_model: String,
}

/// Batch runs dataset items through a provider and scores the outputs. The
/// admission gate is shared by every run in the process.
#[derive(Clone)]
pub struct EvaluationEngine {
    gate: AdmissionGate,
    datasets_dir: path::PathBuf,
}

impl EvaluationEngine {
    #[cfg(test)]
    pub fn new(datasets_dir: path::PathBuf) -> EvaluationEngine {
        return EvaluationEngine::with_gate(datasets_dir, AdmissionGate::new(EVAL_CONCURRENCY));
    }

    pub fn with_gate(datasets_dir: path::PathBuf, gate: AdmissionGate) -> EvaluationEngine {
        return EvaluationEngine { gate, datasets_dir };
    }

    #[cfg(test)]
    pub fn gate(&self) -> &AdmissionGate {
        return &self.gate;
    }

    pub async fn load_dataset(&self, name: &str) -> Result<Vec<DatasetItem>> {
        if !is_valid_dataset_name(name) {
            bail!("Failed to load dataset {name}: invalid dataset name");
        }

        let file_path = self.datasets_dir.join(format!("{name}.jsonl"));
        let content = fs::read_to_string(&file_path)
            .await
            .map_err(|err| return anyhow!("Failed to load dataset {name}: {err}"))?;

        return parse_dataset(&content).map_err(|err| {
            return anyhow!("Failed to load dataset {name}: {err}");
        });
    }

    /// Loads the named dataset and scores it.
    #[cfg(test)]
    pub async fn run(&self, req: &EvalRequest, target: &EvalTarget<'_>) -> Result<EvalResponse> {
        let items = self.load_dataset(&req.dataset).await?;
        return self.run_items(&items, req, target).await;
    }

    /// Scores already loaded items. Prompt B, when given, runs after A.
    pub async fn run_items(
        &self,
        items: &[DatasetItem],
        req: &EvalRequest,
        target: &EvalTarget<'_>,
    ) -> Result<EvalResponse> {
        tracing::info!(
            dataset = %req.dataset,
            items = items.len(),
            mode = %target.mode,
            "Running evaluation"
        );

        let results_a = self.run_prompt(items, req.prompt_a.as_deref(), req, target).await?;
        let results_b = match req.prompt_b.as_deref().filter(|prompt| return !prompt.is_empty()) {
            Some(prompt) => Some(self.run_prompt(items, Some(prompt), req, target).await?),
            None => None,
        };

        let summarize = |results: &[EvalResult]| {
            return compute_stats(&results.iter().map(Sample::from).collect::<Vec<Sample>>());
        };
        let summary = SummaryPair {
            a: summarize(&results_a),
            b: results_b.as_deref().map(summarize),
        };

        let model = match req.model.as_deref().filter(|model| return !model.is_empty()) {
            Some(model) => model.to_string(),
            None if target.mode == RunMode::Mock => MOCK_MODEL_NAME.to_string(),
            None => target.default_model.to_string(),
        };

        return Ok(EvalResponse {
            mode: target.mode,
            model,
            count: items.len(),
            results_a,
            results_b,
            summary,
        });
    }

    /// Runs every item for one system prompt. Items run concurrently through
    /// the gate; results keep dataset order.
    async fn run_prompt(
        &self,
        items: &[DatasetItem],
        system_prompt: Option<&str>,
        req: &EvalRequest,
        target: &EvalTarget<'_>,
    ) -> Result<Vec<EvalResult>> {
        let runs = items.iter().map(|item| {
            return async move {
                return self
                    .gate
                    .run(run_item(item, system_prompt, req, target))
                    .await?;
            };
        });

        return try_join_all(runs).await;
    }
}

async fn run_item(
    item: &DatasetItem,
    system_prompt: Option<&str>,
    req: &EvalRequest,
    target: &EvalTarget<'_>,
) -> Result<EvalResult> {
    let mut messages = vec![];
    if let Some(prompt) = system_prompt.filter(|prompt| return !prompt.is_empty()) {
        messages.push(PayloadMessage {
            role: Role::System,
            content: prompt.to_string(),
        });
    }
    messages.push(PayloadMessage {
        role: Role::User,
        content: item.user.to_string(),
    });

    let model = req.model.clone().filter(|model| return !model.is_empty());
    let payload = SendPayload::new(messages, model, req.temperature);

    let started = Instant::now();
    let (stream, usage) = target
        .provider
        .stream_response_with_usage(&payload)
        .await?
        .into_parts();
    let output = read_to_string(stream).await?;
    let usage = usage.get().await;
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    let score = match item.match_mode {
        Some(mode) => score_with_mode(&output, &item.expect_contains, Some(mode)),
        None => score_contains_all(&output, &item.expect_contains),
    };
    tracing::debug!(
        id = %item.id,
        pass = score.pass,
        hits = score.hits,
        latency_ms,
        "Evaluated item"
    );

    return Ok(EvalResult {
        id: item.id.to_string(),
        latency_ms,
        pass: score.pass,
        output_snippet: snippet(&output),
        tokens_used: usage.and_then(|usage| return usage.total_tokens),
    });
}
