use anyhow::Result;

use super::Config;
use super::ConfigKey;
use crate::application::cli;

#[test]
fn it_serializes_to_valid_toml() -> Result<()> {
    let res = Config::serialize_default(cli::build());
    let doc = res.parse::<toml_edit::DocumentMut>()?;

    assert_eq!(doc.get("use-mock").and_then(|val| return val.as_bool()), Some(true));
    assert_eq!(doc.get("temperature").and_then(|val| return val.as_float()), Some(0.7));
    assert_eq!(doc.get("mock-delay-ms").and_then(|val| return val.as_integer()), Some(120));
    assert_eq!(
        doc.get("mistral-url").and_then(|val| return val.as_str()),
        Some("https://api.mistral.ai")
    );
    assert!(doc.get("config-file").is_none());
    assert!(doc.get("mistral-api-key").is_none());
    assert!(res.contains("# mistral-api-key = \"\""));

    return Ok(());
}

#[test]
fn it_documents_every_key_but_the_config_file() {
    let res = Config::serialize_default(cli::build());
    for key in Config::keys() {
        if *key == ConfigKey::ConfigFile.to_string() {
            continue;
        }
        assert!(res.contains(&format!("{key} =")), "missing {key}");
    }
}

#[tokio::test]
async fn it_loads_config_from_file() -> Result<()> {
    let matches = cli::build().try_get_matches_from(vec![
        "lechat",
        "serve",
        "-c",
        "./config.example.toml",
    ])?;
    Config::load(cli::build(), vec![&matches]).await?;
    return Ok(());
}

#[tokio::test]
async fn it_fails_to_loads_config_from_file() -> Result<()> {
    let matches = cli::build().try_get_matches_from(vec![
        "lechat",
        "serve",
        "-c",
        "./test/bad-config.toml",
    ])?;
    let res = Config::load(cli::build(), vec![&matches]).await;
    assert!(res.is_err());
    return Ok(());
}
