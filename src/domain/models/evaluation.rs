use serde::Deserializer;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::parse_json_body;
use super::validate_temperature;
use super::ValidationDetails;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    Mock,
    Real,
}

/// How a needle list is matched against an output. When absent on a dataset
/// item the alternatives heuristic decides.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    All,
    Any,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: String,
    pub user: String,
    pub expect_contains: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_mode: Option<MatchMode>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRequest {
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_a: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_b: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl EvalRequest {
    pub fn parse(body: &[u8]) -> Result<EvalRequest, ValidationDetails> {
        let req = parse_json_body::<EvalRequest>(body)?;
        let mut details = ValidationDetails::default();
        validate_temperature(&mut details, req.temperature);

        return details.into_result(req);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResult {
    pub id: String,
    pub latency_ms: f64,
    pub pass: bool,
    pub output_snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub latency_ms: f64,
    pub pass: bool,
    pub tokens_used: Option<u64>,
}

impl From<&EvalResult> for Sample {
    fn from(result: &EvalResult) -> Sample {
        return Sample {
            latency_ms: result.latency_ms,
            pass: result.pass,
            tokens_used: result.tokens_used,
        };
    }
}

/// Aggregate statistics. Statistics over an empty sample set are NaN, which
/// serializes as JSON `null`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalSummary {
    pub count: usize,
    #[serde(deserialize_with = "nan_when_null")]
    pub pass_rate: f64,
    #[serde(deserialize_with = "nan_when_null")]
    pub p50: f64,
    #[serde(deserialize_with = "nan_when_null")]
    pub p95: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

fn nan_when_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = <Option<f64> as serde::Deserialize>::deserialize(deserializer)?;
    return Ok(value.unwrap_or(f64::NAN));
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryPair {
    #[serde(rename = "A")]
    pub a: EvalSummary,
    #[serde(rename = "B", default, skip_serializing_if = "Option::is_none")]
    pub b: Option<EvalSummary>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalResponse {
    pub mode: RunMode,
    pub model: String,
    pub count: usize,
    pub results_a: Vec<EvalResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_b: Option<Vec<EvalResult>>,
    pub summary: SummaryPair,
}
