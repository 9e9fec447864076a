use anyhow::Result;

use super::format_result;
use super::format_summary;
use super::run_eval;
use super::run_lab;
use crate::application::cli::EvalArgs;
use crate::application::cli::LabArgs;
use crate::domain::models::EvalRequest;
use crate::domain::models::EvalResponse;
use crate::domain::models::EvalResult;
use crate::domain::models::EvalSummary;
use crate::domain::models::LabRunRecord;
use crate::domain::models::RunMode;
use crate::domain::models::SummaryPair;

fn summary(count: usize, pass_rate: f64, p50: f64, p95: f64) -> EvalSummary {
    return EvalSummary {
        count,
        pass_rate,
        p50,
        p95,
        avg_tokens: None,
        total_tokens: None,
    };
}

fn response(b: Option<EvalSummary>) -> EvalResponse {
    let mut a = summary(4, 0.5, 120.0, 240.0);
    a.avg_tokens = Some(3.5);
    a.total_tokens = Some(14);

    return EvalResponse {
        mode: RunMode::Mock,
        model: "mock-model".to_string(),
        count: 4,
        results_a: vec![],
        results_b: None,
        summary: SummaryPair { a, b },
    };
}

#[test]
fn it_formats_a_single_set_summary() {
    insta::assert_snapshot!(format_summary(&response(None)), @r###"
    Dataset run with mock-model (mock)
    Set  Count    Pass     p50     p95     Avg  Tokens
    A        4     50%     120     240     3.5      14
    "###);
}

#[test]
fn it_prints_dashes_for_empty_sets() {
    let res = response(Some(summary(0, f64::NAN, f64::NAN, f64::NAN)));
    insta::assert_snapshot!(format_summary(&res), @r###"
    Dataset run with mock-model (mock)
    Set  Count    Pass     p50     p95     Avg  Tokens
    A        4     50%     120     240     3.5      14
    B        0       -       -       -       -       -
    "###);
}

#[test]
fn it_formats_results_on_one_line() {
    let result = EvalResult {
        id: "math-1".to_string(),
        latency_ms: 42.0,
        pass: true,
        output_snippet: "The answer\nis 4".to_string(),
        tokens_used: None,
    };
    assert_eq!(format_result("A", &result), "[A] PASS math-1 (42 ms) The answer is 4");
}

#[tokio::test]
async fn it_writes_evaluation_reports() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/eval/run")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"mode":"mock","model":"mock-model","count":1,"resultsA":[{"id":"math-1","latencyMs":12.0,"pass":true,"outputSnippet":"4"}],"summary":{"A":{"count":1,"passRate":1.0,"p50":12.0,"p95":12.0}}}"#,
        )
        .create_async()
        .await;

    let tmp_dir = tempfile::tempdir()?;
    let csv_path = tmp_dir.path().join("reports/eval.csv");
    let json_path = tmp_dir.path().join("eval.json");

    run_eval(
        &server.url(),
        EvalArgs {
            request: EvalRequest {
                dataset: "sanity".to_string(),
                prompt_a: None,
                prompt_b: None,
                model: None,
                temperature: None,
            },
            csv: Some(csv_path.clone()),
            json: Some(json_path.clone()),
        },
    )
    .await?;

    let csv = std::fs::read_to_string(&csv_path)?;
    assert!(csv.starts_with("Summary\n"));
    assert!(csv.contains("math-1"));

    let json = serde_json::from_str::<EvalResponse>(&std::fs::read_to_string(&json_path)?)?;
    assert_eq!(json.results_a[0].id, "math-1");
    mock.assert_async().await;

    return Ok(());
}

#[tokio::test]
async fn it_exports_both_lab_runs() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/chat/stream")
        .with_status(200)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body("Hi there")
        .expect(2)
        .create_async()
        .await;

    let tmp_dir = tempfile::tempdir()?;
    let export_path = tmp_dir.path().join("lab.jsonl");

    run_lab(
        &server.url(),
        LabArgs {
            system_a: "Be brief.".to_string(),
            system_b: "Be verbose.".to_string(),
            user: "Hello".to_string(),
            export: Some(export_path.clone()),
        },
    )
    .await?;

    let records = std::fs::read_to_string(&export_path)?
        .lines()
        .map(serde_json::from_str::<LabRunRecord>)
        .collect::<Result<Vec<LabRunRecord>, serde_json::Error>>()?;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| return record.output == "Hi there"));
    mock.assert_async().await;

    return Ok(());
}
