use std::path;

use anyhow::Result;

use super::build;
use super::eval_args;
use super::lab_args;
use super::LabArgs;

#[test]
fn it_reads_lab_arguments() -> Result<()> {
    let matches = build().try_get_matches_from(vec![
        "lechat",
        "lab",
        "--system-a",
        "You are terse.",
        "--system-b",
        "You are verbose.",
        "-u",
        "Explain rust.",
        "--export",
        "runs.jsonl",
    ])?;
    let (name, subcmd_matches) = matches.subcommand().unwrap();
    assert_eq!(name, "lab");

    assert_eq!(
        lab_args(subcmd_matches),
        LabArgs {
            system_a: "You are terse.".to_string(),
            system_b: "You are verbose.".to_string(),
            user: "Explain rust.".to_string(),
            export: Some(path::PathBuf::from("runs.jsonl")),
        }
    );

    return Ok(());
}

#[test]
fn it_requires_both_lab_prompts() {
    let res = build().try_get_matches_from(vec!["lechat", "lab", "--system-a", "A", "-u", "Hi"]);
    assert!(res.is_err());
}

#[test]
fn it_reads_eval_arguments() -> Result<()> {
    let matches = build().try_get_matches_from(vec![
        "lechat",
        "eval",
        "-d",
        "sanity",
        "--prompt-a",
        "Be brief.",
        "--eval-temperature",
        "0.2",
        "--csv",
        "report.csv",
    ])?;
    let (_, subcmd_matches) = matches.subcommand().unwrap();
    let args = eval_args(subcmd_matches);

    assert_eq!(args.request.dataset, "sanity");
    assert_eq!(args.request.prompt_a, Some("Be brief.".to_string()));
    assert_eq!(args.request.prompt_b, None);
    assert_eq!(args.request.model, None);
    assert_eq!(args.request.temperature, Some(0.2));
    assert_eq!(args.csv, Some(path::PathBuf::from("report.csv")));
    assert_eq!(args.json, None);

    return Ok(());
}

#[test]
fn it_accepts_config_flags_after_subcommands() -> Result<()> {
    let matches = build().try_get_matches_from(vec![
        "lechat",
        "serve",
        "--use-mock",
        "false",
        "--listen-addr",
        "0.0.0.0:8080",
    ])?;
    let (_, subcmd_matches) = matches.subcommand().unwrap();

    assert_eq!(
        subcmd_matches
            .get_one::<String>("use-mock")
            .map(|val| return val.as_str()),
        Some("false")
    );
    assert_eq!(
        subcmd_matches.get_one::<String>("listen-addr").map(|val| return val.as_str()),
        Some("0.0.0.0:8080")
    );

    return Ok(());
}

#[test]
fn it_rejects_unknown_mock_flags() {
    let res = build().try_get_matches_from(vec!["lechat", "serve", "--use-mock", "maybe"]);
    assert!(res.is_err());
}
