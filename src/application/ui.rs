#[cfg(test)]
#[path = "ui_test.rs"]
mod tests;

use std::future::Future;
use std::io::Write;
use std::path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use owo_colors::OwoColorize;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::models::ChatEvent;
use crate::domain::models::ChatMessage;
use crate::domain::models::Role;
use crate::domain::services::ControllerOptions;
use crate::domain::services::FilePersistence;
use crate::domain::services::SessionController;
use crate::infrastructure::transport::HttpTransport;

pub const HELP_TEXT: &str = "COMMANDS:
- /retry - Send your last message again.
- /clear - Reset the conversation and forget the saved copy.
- /help - Show this help.
- /quit - Exit. Ctrl-D works too.

HOTKEYS:
- Ctrl-C - Stop the reply that is streaming, or exit when idle.";

const CANCEL_RETRY: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Retry,
    Clear,
    Help,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }

    match line {
        "/retry" => return Input::Retry,
        "/clear" => return Input::Clear,
        "/help" => return Input::Help,
        "/quit" | "/exit" | "/q" => return Input::Quit,
        _ => return Input::Message(line.to_string()),
    }
}

pub fn format_message(message: &ChatMessage) -> String {
    return format!("{}> {}", message.role, message.content);
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

/// Prints session events as they arrive. Ends once every sender is gone.
async fn render(mut rx: mpsc::UnboundedReceiver<ChatEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ChatEvent::MessageAppended(message) => {
                if message.role == Role::Assistant {
                    print!("{}", "assistant> ".cyan());
                    flush_stdout();
                }
            }
            ChatEvent::MessageDelta { text, .. } => {
                print!("{text}");
                flush_stdout();
            }
            ChatEvent::StreamFinished { latency_ms, error } => {
                println!();
                if let Some(error) = error {
                    println!("{}", format!("error: {error}").red());
                } else if let Some(latency_ms) = latency_ms {
                    println!("{}", format!("({latency_ms:.0} ms)").dimmed());
                }
            }
            ChatEvent::Cleared(_) => {
                println!("{}", "Conversation cleared.".dimmed());
            }
            ChatEvent::Restored(messages) => {
                for message in messages.iter() {
                    println!("{}", format_message(message).dimmed());
                }
            }
        }
    }
}

/// Forwards every Ctrl-C for the rest of the process. The first
/// `ctrl_c()` call replaces the default SIGINT handler, so there is exactly
/// one listener.
fn listen_for_interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel::<()>();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                return;
            }
        }
    });

    return rx;
}

/// Calls `cancel` until `task` stops. Covers an interrupt that lands before
/// the request has registered itself as in flight.
pub async fn cancel_until_done<F, Fut>(task: &mut JoinHandle<()>, cancel: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        cancel().await;
        tokio::select! {
            _ = &mut *task => return,
            _ = tokio::time::sleep(CANCEL_RETRY) => {},
        }
    }
}

/// Runs `fut` to completion, cancelling the request on Ctrl-C.
async fn run_cancellable<F>(
    controller: &SessionController,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
    fut: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let mut task = tokio::spawn(fut);
    tokio::select! {
        _ = &mut task => {},
        Some(_) = interrupts.recv() => {
            cancel_until_done(&mut task, || {
                return async move {
                    if controller.is_streaming().await {
                        controller.cancel().await;
                    }
                };
            })
            .await;
        }
    }

    // Presses made while cancelling must not count as an exit at the prompt.
    while interrupts.try_recv().is_ok() {}
}

pub async fn start(server_url: &str, data_dir: path::PathBuf, app_name: &str) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<ChatEvent>();
    let controller = SessionController::new(
        Arc::new(HttpTransport::new(server_url)),
        Arc::new(FilePersistence::new(data_dir)),
        ControllerOptions {
            events: Some(tx),
            ..ControllerOptions::default()
        },
    );
    let printer = tokio::spawn(render(rx));

    println!("{}", app_name.bold());
    if !controller.restore().await {
        for message in controller.messages().await.iter() {
            println!("{}", format_message(message).dimmed());
        }
    }

    controller.load_server_defaults().await;
    let settings = controller.settings().await;
    println!(
        "{}",
        format!(
            "Connected to {server_url} (model {}, temperature {}). Type /help for commands.",
            settings.model, settings.temperature
        )
        .dimmed()
    );

    let mut interrupts = listen_for_interrupts();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}", "you> ".green());
        flush_stdout();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = interrupts.recv() => {
                println!();
                None
            }
        };
        let line = match line {
            Some(line) => line,
            None => break,
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => println!("{HELP_TEXT}"),
            Input::Clear => controller.clear().await,
            Input::Retry => {
                let background = controller.clone();
                run_cancellable(&controller, &mut interrupts, async move {
                    background.retry_last().await;
                })
                .await;
            }
            Input::Message(text) => {
                controller.set_input(&text).await;
                let background = controller.clone();
                run_cancellable(&controller, &mut interrupts, async move {
                    background.send_input().await;
                })
                .await;
            }
        }
    }

    controller.flush().await;
    drop(controller);
    let _ = printer.await;

    return Ok(());
}
