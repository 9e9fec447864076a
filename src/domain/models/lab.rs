use serde_derive::Deserialize;
use serde_derive::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum LabLabel {
    A,
    B,
}

/// A completed lab run. Recorded once, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRunRecord {
    #[serde(rename = "promptLabel")]
    pub label: LabLabel,
    pub system_prompt: String,
    #[serde(rename = "user")]
    pub user_prompt: String,
    pub output: String,
    pub latency_ms: f64,
    /// RFC3339.
    pub timestamp: String,
}
