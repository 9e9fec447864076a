#[cfg(test)]
#[path = "reports_test.rs"]
mod tests;

use std::path;
use std::sync::Arc;

use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::fs;
use tokio::sync::mpsc;

use super::cli::EvalArgs;
use super::cli::LabArgs;
use crate::domain::models::EvalResponse;
use crate::domain::models::EvalResult;
use crate::domain::models::EvalSummary;
use crate::domain::models::LabEvent;
use crate::domain::services::eval_to_csv;
use crate::domain::services::eval_to_json;
use crate::domain::services::LabSession;
use crate::infrastructure::transport::HttpTransport;

fn stat(value: f64) -> String {
    if value.is_nan() {
        return "-".to_string();
    }
    return format!("{value:.0}");
}

fn summary_line(label: &str, summary: &EvalSummary) -> String {
    let pass_rate = if summary.pass_rate.is_nan() {
        "-".to_string()
    } else {
        format!("{:.0}%", summary.pass_rate * 100.0)
    };
    let avg_tokens = summary
        .avg_tokens
        .map(|val| return format!("{val:.1}"))
        .unwrap_or_else(|| return "-".to_string());
    let total_tokens = summary
        .total_tokens
        .map(|val| return val.to_string())
        .unwrap_or_else(|| return "-".to_string());

    return format!(
        "{label:<4}{:>6}{:>8}{:>8}{:>8}{:>8}{:>8}",
        summary.count,
        pass_rate,
        stat(summary.p50),
        stat(summary.p95),
        avg_tokens,
        total_tokens
    );
}

/// Plain text table of the evaluation summary. Latencies are in milliseconds.
pub fn format_summary(res: &EvalResponse) -> String {
    let mut lines = vec![
        format!("Dataset run with {} ({})", res.model, res.mode),
        format!(
            "{:<4}{:>6}{:>8}{:>8}{:>8}{:>8}{:>8}",
            "Set", "Count", "Pass", "p50", "p95", "Avg", "Tokens"
        ),
        summary_line("A", &res.summary.a),
    ];
    if let Some(summary) = &res.summary.b {
        lines.push(summary_line("B", summary));
    }

    return lines.join("\n");
}

pub fn format_result(label: &str, result: &EvalResult) -> String {
    let mark = if result.pass { "PASS" } else { "FAIL" };
    return format!(
        "[{label}] {mark} {} ({:.0} ms) {}",
        result.id,
        result.latency_ms,
        result.output_snippet.replace('\n', " ")
    );
}

async fn write_report(path: &path::Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }
    fs::write(path, contents).await?;
    println!("{}", format!("Wrote {}", path.display()).dimmed());

    return Ok(());
}

fn print_results(label: &str, results: &[EvalResult]) {
    for result in results {
        let line = format_result(label, result);
        if result.pass {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }
}

pub async fn run_eval(server_url: &str, args: EvalArgs) -> Result<()> {
    let transport = HttpTransport::new(server_url);
    tracing::debug!(
        dataset = args.request.dataset,
        url = transport.base_url(),
        "Running evaluation"
    );

    let res = transport.run_eval(&args.request).await?;

    print_results("A", &res.results_a);
    if let Some(results) = &res.results_b {
        print_results("B", results);
    }
    println!();
    println!("{}", format_summary(&res));

    if let Some(csv_path) = &args.csv {
        write_report(csv_path, &eval_to_csv(&res)).await?;
    }
    if let Some(json_path) = &args.json {
        write_report(json_path, &eval_to_json(&res)?).await?;
    }

    return Ok(());
}

async fn print_lab_events(mut rx: mpsc::UnboundedReceiver<LabEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            LabEvent::Started(label) => {
                println!("{}", format!("[{label}] started").dimmed());
            }
            LabEvent::Failed { label, message } => {
                println!("{}", format!("[{label}] failed: {message}").red());
            }
            LabEvent::Finished(record) => {
                println!(
                    "{}",
                    format!("[{}] finished in {:.0} ms", record.label, record.latency_ms).dimmed()
                );
            }
            LabEvent::Delta { .. } => {}
        }
    }
}

pub async fn run_lab(server_url: &str, args: LabArgs) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<LabEvent>();
    let session = LabSession::new(Arc::new(HttpTransport::new(server_url)), Some(tx));
    let printer = tokio::spawn(print_lab_events(rx));

    tokio::select! {
        _ = session.run_both(&args.system_a, &args.system_b, &args.user) => {},
        _ = tokio::signal::ctrl_c() => {
            for runner in [&session.a, &session.b] {
                if runner.is_streaming().await {
                    println!("{}", format!("[{}] cancelled", runner.label()).dimmed());
                }
            }
            session.clear_all().await;
        }
    }

    for runner in [&session.a, &session.b] {
        println!();
        println!("{}", format!("Prompt {}", runner.label()).bold());
        println!("{}", runner.output().await);
    }

    if let Some(export_path) = &args.export {
        let records = session.records().await;
        write_report(export_path, &session.export_jsonl().await?).await?;
        println!("{}", format!("Exported {} runs", records.len()).dimmed());
    }

    drop(session);
    let _ = printer.await;

    return Ok(());
}
