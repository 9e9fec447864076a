#[cfg(test)]
#[path = "lab_runner_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::SecondsFormat;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::to_jsonl;
use super::Utf8StreamDecoder;
use crate::domain::models::ChatError;
use crate::domain::models::LabEvent;
use crate::domain::models::LabLabel;
use crate::domain::models::LabRunRecord;
use crate::domain::models::PayloadMessage;
use crate::domain::models::Role;
use crate::domain::models::SendPayload;
use crate::domain::models::TransportBox;

#[derive(Default)]
struct RunnerState {
    output: String,
    generation: u64,
    in_flight: Option<(u64, CancellationToken)>,
    latency_ms: Option<f64>,
}

impl RunnerState {
    fn is_current(&self, generation: u64) -> bool {
        return matches!(&self.in_flight, Some((current, _)) if *current == generation);
    }
}

/// A reduced chat session: every run is a fresh system + user exchange with
/// no history, retry or persistence.
#[derive(Clone)]
pub struct LabRunner {
    label: LabLabel,
    transport: TransportBox,
    state: Arc<Mutex<RunnerState>>,
    events: Option<mpsc::UnboundedSender<LabEvent>>,
}

impl LabRunner {
    pub fn new(
        label: LabLabel,
        transport: TransportBox,
        events: Option<mpsc::UnboundedSender<LabEvent>>,
    ) -> LabRunner {
        return LabRunner {
            label,
            transport,
            state: Arc::new(Mutex::new(RunnerState::default())),
            events,
        };
    }

    fn emit(&self, event: LabEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn label(&self) -> LabLabel {
        return self.label;
    }

    pub async fn output(&self) -> String {
        return self.state.lock().await.output.to_string();
    }

    pub async fn is_streaming(&self) -> bool {
        return self.state.lock().await.in_flight.is_some();
    }

    pub async fn latency_ms(&self) -> Option<f64> {
        return self.state.lock().await.latency_ms;
    }

    /// Streams one exchange into the output buffer, aborting this runner's
    /// previous run first. Returns the record of a completed run; aborted and
    /// failed runs return nothing.
    pub async fn run(&self, system_prompt: &str, user_prompt: &str) -> Option<LabRunRecord> {
        if system_prompt.trim().is_empty() || user_prompt.trim().is_empty() {
            return None;
        }

        let (generation, cancel) = {
            let mut state = self.state.lock().await;
            if let Some((_, previous)) = state.in_flight.take() {
                previous.cancel();
            }

            state.generation += 1;
            let generation = state.generation;
            let cancel = CancellationToken::new();
            state.in_flight = Some((generation, cancel.clone()));
            state.output = "".to_string();
            state.latency_ms = None;

            (generation, cancel)
        };
        self.emit(LabEvent::Started(self.label));

        let payload = SendPayload::new(
            vec![
                PayloadMessage {
                    role: Role::System,
                    content: system_prompt.to_string(),
                },
                PayloadMessage {
                    role: Role::User,
                    content: user_prompt.to_string(),
                },
            ],
            None,
            None,
        );

        let started = Instant::now();
        let outcome = self.stream(generation, cancel, &payload).await;
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            return None;
        }
        state.in_flight = None;

        match outcome {
            Ok(()) => {
                state.latency_ms = Some(elapsed);
                let record = LabRunRecord {
                    label: self.label,
                    system_prompt: system_prompt.to_string(),
                    user_prompt: user_prompt.to_string(),
                    output: state.output.to_string(),
                    latency_ms: elapsed,
                    timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                };
                self.emit(LabEvent::Finished(record.clone()));

                return Some(record);
            }
            Err(err) if err.is_abort() => {
                return None;
            }
            Err(err) => {
                tracing::error!(label = %self.label, error = ?err, "Lab run failed");
                let message = err.to_string();
                if state.output.is_empty() {
                    state.output = format!("[error] {message}");
                } else {
                    state.output += &format!("\n[error] {message}");
                }
                self.emit(LabEvent::Failed {
                    label: self.label,
                    message,
                });

                return None;
            }
        }
    }

    async fn stream(
        &self,
        generation: u64,
        cancel: CancellationToken,
        payload: &SendPayload,
    ) -> Result<(), ChatError> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(ChatError::Aborted),
            res = self.transport.open_stream(payload, cancel.clone()) => res?,
        };

        let mut decoder = Utf8StreamDecoder::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Aborted),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => self.apply(generation, &decoder.decode(&chunk)).await?,
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        return self.apply(generation, &decoder.finish()).await;
    }

    async fn apply(&self, generation: u64, text: &str) -> Result<(), ChatError> {
        if text.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            return Err(ChatError::Aborted);
        }
        state.output.push_str(text);
        self.emit(LabEvent::Delta {
            label: self.label,
            text: text.to_string(),
        });

        return Ok(());
    }

    /// Aborts any run and resets the output.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        if let Some((_, cancel)) = state.in_flight.take() {
            cancel.cancel();
        }
        state.output = "".to_string();
        state.latency_ms = None;
    }
}

/// Two independent runners sharing an append only record list.
#[derive(Clone)]
pub struct LabSession {
    pub a: LabRunner,
    pub b: LabRunner,
    records: Arc<Mutex<Vec<LabRunRecord>>>,
}

impl LabSession {
    pub fn new(
        transport: TransportBox,
        events: Option<mpsc::UnboundedSender<LabEvent>>,
    ) -> LabSession {
        return LabSession {
            a: LabRunner::new(LabLabel::A, transport.clone(), events.clone()),
            b: LabRunner::new(LabLabel::B, transport, events),
            records: Arc::new(Mutex::new(vec![])),
        };
    }

    pub fn runner(&self, label: LabLabel) -> &LabRunner {
        match label {
            LabLabel::A => return &self.a,
            LabLabel::B => return &self.b,
        }
    }

    pub async fn run(&self, label: LabLabel, system_prompt: &str, user_prompt: &str) {
        if let Some(record) = self.runner(label).run(system_prompt, user_prompt).await {
            self.records.lock().await.push(record);
        }
    }

    /// Fires both runners concurrently against the same user prompt.
    pub async fn run_both(&self, system_a: &str, system_b: &str, user_prompt: &str) {
        tokio::join!(
            self.run(LabLabel::A, system_a, user_prompt),
            self.run(LabLabel::B, system_b, user_prompt)
        );
    }

    pub async fn clear_all(&self) {
        tokio::join!(self.a.clear(), self.b.clear());
        self.records.lock().await.clear();
    }

    pub async fn records(&self) -> Vec<LabRunRecord> {
        return self.records.lock().await.clone();
    }

    pub async fn export_jsonl(&self) -> Result<String> {
        return to_jsonl(&self.records().await);
    }
}
