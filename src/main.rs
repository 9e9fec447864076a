#![deny(clippy::implicit_return)]
#![allow(clippy::needless_return)]

mod application;
mod configuration;
mod domain;
mod infrastructure;

use std::env;
use std::path;
use std::process;

use anyhow::Error;
use anyhow::Result;
use owo_colors::OwoColorize;

use crate::application::cli;
use crate::application::cli::Run;
use crate::application::reports;
use crate::application::server;
use crate::application::ui;
use crate::configuration::Config;
use crate::configuration::ConfigKey;

fn handle_error(err: Error) {
    eprintln!(
        "{}",
        format!(
            "Oh no! Le Chat++ has failed with the following app version and error.\n\nVersion: {}\nError: {}",
            env!("CARGO_PKG_VERSION"),
            err
        )
        .red()
    );

    let backtrace = err.backtrace();
    if backtrace.to_string() == "disabled backtrace" {
        let args = env::args().collect::<Vec<String>>().join(" ");
        eprintln!("\nRunning the following can help explain further what the issue is:");
        eprintln!("\nRUST_BACKTRACE=1 {args}");
    } else {
        eprintln!("\n{}", backtrace);
    }

    process::exit(1);
}

fn log_dir() -> path::PathBuf {
    if let Ok(dir) = env::var("LECHAT_LOG_DIR") {
        return path::PathBuf::from(dir);
    }

    return dirs::cache_dir()
        .unwrap_or_else(|| return path::PathBuf::from("."))
        .join("lechat");
}

async fn run(to_run: Run) -> Result<()> {
    let server_url = Config::get(ConfigKey::ServerUrl);

    match to_run {
        Run::Serve => return server::serve(&Config::get(ConfigKey::ListenAddr)).await,
        Run::Chat => {
            return ui::start(
                &server_url,
                path::PathBuf::from(Config::get(ConfigKey::DataDir)),
                &Config::get(ConfigKey::AppName),
            )
            .await;
        }
        Run::Lab(args) => return reports::run_lab(&server_url, args).await,
        Run::Eval(args) => return reports::run_eval(&server_url, args).await,
    }
}

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        better_panic::Settings::auto().create_panic_handler()(panic_info);
    }));

    let file_appender = tracing_appender::rolling::never(log_dir(), "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    if env::var("RUST_LOG")
        .unwrap_or_else(|_| return "".to_string())
        .contains("lechat")
    {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(writer)
            .init();
    }

    let to_run = match cli::parse().await {
        Ok(Some(to_run)) => to_run,
        Ok(None) => process::exit(0),
        Err(err) => {
            handle_error(err);
            return;
        }
    };

    if let Err(err) = run(to_run).await {
        handle_error(err);
    }

    drop(guard);
    process::exit(0);
}
