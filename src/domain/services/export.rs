#[cfg(test)]
#[path = "export_test.rs"]
mod tests;

use anyhow::Result;

use crate::domain::models::EvalResponse;
use crate::domain::models::EvalResult;
use crate::domain::models::EvalSummary;
use crate::domain::models::LabRunRecord;

const SUMMARY_HEADERS: [&str; 7] = [
    "Set",
    "Count",
    "PassRate",
    "P50",
    "P95",
    "AvgTokens",
    "TotalTokens",
];

const DETAIL_HEADERS: [&str; 6] = [
    "Set",
    "ID",
    "Pass",
    "LatencyMs",
    "TokensUsed",
    "OutputSnippet",
];

/// One JSON object per lab run, in insertion order.
pub fn to_jsonl(records: &[LabRunRecord]) -> Result<String> {
    let lines = records
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<String>, serde_json::Error>>()?;

    return Ok(lines.join("\n"));
}

/// Quotes a cell containing a comma, quote or newline, doubling inner quotes.
pub fn escape_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        return format!("\"{}\"", value.replace('"', "\"\""));
    }

    return value.to_string();
}

pub fn to_csv(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return "".to_string();
    }

    let mut lines = vec![headers
        .iter()
        .map(|header| return escape_cell(header))
        .collect::<Vec<String>>()
        .join(",")];

    for row in rows {
        lines.push(
            row.iter()
                .map(|cell| return escape_cell(cell))
                .collect::<Vec<String>>()
                .join(","),
        );
    }

    return lines.join("\n");
}

fn optional_cell<T: ToString>(value: Option<T>) -> String {
    return value.map(|value| return value.to_string()).unwrap_or_default();
}

fn summary_row(set: &str, summary: &EvalSummary) -> Vec<String> {
    return vec![
        set.to_string(),
        summary.count.to_string(),
        summary.pass_rate.to_string(),
        summary.p50.to_string(),
        summary.p95.to_string(),
        optional_cell(summary.avg_tokens),
        optional_cell(summary.total_tokens),
    ];
}

fn detail_rows(set: &str, results: &[EvalResult]) -> Vec<Vec<String>> {
    return results
        .iter()
        .map(|result| {
            return vec![
                set.to_string(),
                result.id.to_string(),
                result.pass.to_string(),
                result.latency_ms.to_string(),
                optional_cell(result.tokens_used),
                result.output_snippet.to_string(),
            ];
        })
        .collect();
}

/// Summary section followed by per item rows for every prompt that ran.
pub fn eval_to_csv(response: &EvalResponse) -> String {
    let mut summary_rows = vec![summary_row("A", &response.summary.a)];
    if let Some(summary) = &response.summary.b {
        summary_rows.push(summary_row("B", summary));
    }

    let mut rows = detail_rows("A", &response.results_a);
    if let Some(results) = &response.results_b {
        rows.extend(detail_rows("B", results));
    }

    return format!(
        "Summary\n{}\n\nDetailed Results\n{}",
        to_csv(&SUMMARY_HEADERS, &summary_rows),
        to_csv(&DETAIL_HEADERS, &rows)
    );
}

pub fn eval_to_json(response: &EvalResponse) -> Result<String> {
    return Ok(serde_json::to_string_pretty(response)?);
}
