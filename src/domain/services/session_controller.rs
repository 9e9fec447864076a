#[cfg(test)]
#[path = "session_controller_test.rs"]
mod tests;

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::PersistenceBox;
use super::Utf8StreamDecoder;
use crate::domain::models::is_default_message_set;
use crate::domain::models::ChatError;
use crate::domain::models::ChatEvent;
use crate::domain::models::ChatMessage;
use crate::domain::models::PartialSettings;
use crate::domain::models::PayloadMessage;
use crate::domain::models::Role;
use crate::domain::models::SendPayload;
use crate::domain::models::StreamSettings;
use crate::domain::models::TransportBox;

pub const HISTORY_LIMIT: usize = 20;
pub const PERSIST_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Clone, Debug, Default)]
pub struct ControllerOptions {
    /// Baseline conversation, restored by `clear`. Defaults to the greeting.
    pub initial_messages: Option<Vec<ChatMessage>>,
    /// Explicit per session overrides. Always win.
    pub settings: PartialSettings,
    /// Caller supplied defaults. When set the server config is never fetched.
    pub defaults: Option<PartialSettings>,
    pub events: Option<mpsc::UnboundedSender<ChatEvent>>,
}

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
    assistant_id: Option<String>,
    started: Instant,
}

/// A debounced write. Cancelling only interrupts the debounce wait; once the
/// write has started it runs to completion.
struct PendingPersist {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ControllerState {
    messages: Vec<ChatMessage>,
    input: String,
    streaming: Option<InFlight>,
    generation: u64,
    error: Option<String>,
    latency_ms: Option<f64>,
    last_user_text: Option<String>,
    server_defaults: PartialSettings,
    persist_task: Option<PendingPersist>,
}

impl ControllerState {
    fn is_current(&self, generation: u64) -> bool {
        return self
            .streaming
            .as_ref()
            .map(|in_flight| return in_flight.generation == generation)
            .unwrap_or(false);
    }

    /// The most recent messages, minus any with nothing to say.
    fn history(&self) -> Vec<PayloadMessage> {
        let start = self.messages.len().saturating_sub(HISTORY_LIMIT);
        return self.messages[start..]
            .iter()
            .filter(|message| return !message.content.is_empty())
            .map(PayloadMessage::from)
            .collect();
    }
}

/// Owns one conversation: the message list, at most one in flight streaming
/// request, and the debounced write through to local persistence. Cheap to
/// clone; clones share state.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<ControllerState>>,
    transport: TransportBox,
    persistence: PersistenceBox,
    initial_messages: Vec<ChatMessage>,
    overrides: PartialSettings,
    defaults: Option<PartialSettings>,
    events: Option<mpsc::UnboundedSender<ChatEvent>>,
}

impl SessionController {
    pub fn new(
        transport: TransportBox,
        persistence: PersistenceBox,
        options: ControllerOptions,
    ) -> SessionController {
        let initial_messages = options
            .initial_messages
            .unwrap_or_else(|| return vec![ChatMessage::system_greeting()]);

        let state = ControllerState {
            messages: initial_messages.clone(),
            input: "".to_string(),
            streaming: None,
            generation: 0,
            error: None,
            latency_ms: None,
            last_user_text: None,
            server_defaults: options.defaults.clone().unwrap_or_default(),
            persist_task: None,
        };

        return SessionController {
            state: Arc::new(Mutex::new(state)),
            transport,
            persistence,
            initial_messages,
            overrides: options.settings,
            defaults: options.defaults,
            events: options.events,
        };
    }

    fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        return self.state.lock().await.messages.clone();
    }

    pub async fn is_streaming(&self) -> bool {
        return self.state.lock().await.streaming.is_some();
    }

    pub async fn error(&self) -> Option<String> {
        return self.state.lock().await.error.clone();
    }

    pub async fn latency_ms(&self) -> Option<f64> {
        return self.state.lock().await.latency_ms;
    }

    pub async fn input(&self) -> String {
        return self.state.lock().await.input.to_string();
    }

    pub async fn set_input(&self, text: &str) {
        self.state.lock().await.input = text.to_string();
    }

    pub async fn settings(&self) -> StreamSettings {
        let state = self.state.lock().await;
        return StreamSettings::resolve(&self.overrides, &state.server_defaults);
    }

    /// Replaces the conversation with the persisted one, if anything usable
    /// was stored. Returns whether a record was restored.
    pub async fn restore(&self) -> bool {
        let stored = match self.persistence.load().await {
            Some(messages) if !messages.is_empty() => messages,
            _ => return false,
        };

        let mut state = self.state.lock().await;
        if state.streaming.is_some() {
            return false;
        }
        state.messages = stored.clone();
        self.emit(ChatEvent::Restored(stored));

        return true;
    }

    /// Reads the server advertised model and temperature. Skipped when the
    /// caller supplied defaults. Failures keep the current defaults.
    pub async fn load_server_defaults(&self) {
        if self.defaults.is_some() {
            return;
        }

        let remote = match self.transport.fetch_config().await {
            Ok(remote) => remote,
            Err(err) => {
                tracing::warn!(error = ?err, "Failed to load server config");
                return;
            }
        };

        let mut state = self.state.lock().await;
        if let Some(model) = remote.model.filter(|model| return !model.is_empty()) {
            state.server_defaults.model = Some(model);
        }
        if let Some(temperature) = remote.temperature {
            state.server_defaults.temperature = Some(temperature);
        }
    }

    pub async fn send_input(&self) {
        let text = self.input().await;
        self.send(&text).await;
    }

    /// Sends `text` as a new user message and streams the reply into a new
    /// assistant message. Resolves once the request settles. No-op for blank
    /// text or while another request is in flight.
    pub async fn send(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let (generation, cancel, payload) = {
            let mut state = self.state.lock().await;
            if state.streaming.is_some() {
                return;
            }

            state.error = None;
            state.input = "".to_string();
            state.latency_ms = None;

            let user_message = ChatMessage::user(text);
            state.messages.push(user_message.clone());
            state.last_user_text = Some(text.to_string());
            self.emit(ChatEvent::MessageAppended(user_message));
            self.schedule_persist(&mut state);

            state.generation += 1;
            let generation = state.generation;
            let cancel = CancellationToken::new();
            state.streaming = Some(InFlight {
                generation,
                cancel: cancel.clone(),
                assistant_id: None,
                started: Instant::now(),
            });

            let settings = StreamSettings::resolve(&self.overrides, &state.server_defaults);
            let payload = SendPayload::new(
                state.history(),
                Some(settings.model),
                Some(settings.temperature),
            );

            (generation, cancel, payload)
        };

        tracing::debug!(generation, messages = payload.messages.len(), "Sending chat request");

        let outcome = self.stream(generation, cancel, payload).await;
        self.finalize(generation, outcome).await;
    }

    async fn stream(
        &self,
        generation: u64,
        cancel: CancellationToken,
        payload: SendPayload,
    ) -> Result<(), ChatError> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(ChatError::Aborted),
            res = self.transport.open_stream(&payload, cancel.clone()) => res?,
        };

        let assistant_message = ChatMessage::assistant();
        let assistant_id = assistant_message.id.to_string();
        {
            let mut state = self.state.lock().await;
            if !state.is_current(generation) {
                return Err(ChatError::Aborted);
            }
            if let Some(in_flight) = state.streaming.as_mut() {
                in_flight.assistant_id = Some(assistant_id.to_string());
            }
            state.messages.push(assistant_message.clone());
            self.emit(ChatEvent::MessageAppended(assistant_message));
            self.schedule_persist(&mut state);
        }

        let mut decoder = Utf8StreamDecoder::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ChatError::Aborted),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let text = decoder.decode(&chunk);
                    self.apply(generation, &assistant_id, &text).await?;
                }
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        let trailing = decoder.finish();
        self.apply(generation, &assistant_id, &trailing).await?;

        return Ok(());
    }

    /// Appends an increment to the active assistant message, unless the
    /// request that produced it has been superseded.
    async fn apply(&self, generation: u64, id: &str, text: &str) -> Result<(), ChatError> {
        if text.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            return Err(ChatError::Aborted);
        }

        let message = state
            .messages
            .iter_mut()
            .rev()
            .find(|message| return message.id == id)
            .ok_or_else(|| return ChatError::Internal("Unexpected streaming error".to_string()))?;
        message.append(text);

        self.emit(ChatEvent::MessageDelta {
            id: id.to_string(),
            text: text.to_string(),
        });
        self.schedule_persist(&mut state);

        return Ok(());
    }

    /// Single exit point for every request. Ignored when the request was
    /// superseded or already cancelled.
    async fn finalize(&self, generation: u64, outcome: Result<(), ChatError>) {
        let mut state = self.state.lock().await;
        if !state.is_current(generation) {
            return;
        }

        let in_flight = match state.streaming.take() {
            Some(in_flight) => in_flight,
            None => return,
        };
        let elapsed = in_flight.started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(()) => {
                state.error = None;
                state.latency_ms = Some(elapsed);
            }
            Err(err) if err.is_abort() => {
                state.error = None;
            }
            Err(err) => {
                tracing::error!(error = ?err, generation, "Chat stream failed");
                state.error = Some(err.to_string());
                state.latency_ms = Some(elapsed);
            }
        }

        self.emit(ChatEvent::StreamFinished {
            latency_ms: state.latency_ms,
            error: state.error.clone(),
        });
    }

    /// Aborts the in flight request. Content already streamed is kept.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;
        if let Some(in_flight) = state.streaming.take() {
            tracing::debug!(generation = in_flight.generation, "Cancelling chat request");
            in_flight.cancel.cancel();
            state.error = None;
            self.emit(ChatEvent::StreamFinished {
                latency_ms: None,
                error: None,
            });
        }
    }

    /// Sends the last submitted user text again as a new message.
    pub async fn retry_last(&self) {
        let text = {
            let state = self.state.lock().await;
            if state.streaming.is_some() {
                return;
            }

            state.last_user_text.clone().or_else(|| {
                return state
                    .messages
                    .iter()
                    .rev()
                    .find(|message| return message.role == Role::User)
                    .map(|message| return message.content.to_string());
            })
        };

        if let Some(text) = text {
            self.send(&text).await;
        }
    }

    /// Cancels, resets to the baseline conversation, and evicts the
    /// persisted record.
    pub async fn clear(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            if let Some(in_flight) = state.streaming.take() {
                in_flight.cancel.cancel();
            }

            state.messages = self.initial_messages.clone();
            state.error = None;
            state.latency_ms = None;
            state.input = "".to_string();
            state.last_user_text = None;
            self.emit(ChatEvent::Cleared(self.initial_messages.clone()));

            state.persist_task.take()
        };

        if let Some(pending) = pending {
            pending.cancel.cancel();
            let _ = pending.task.await;
        }
        self.persistence.clear().await;
    }

    /// Waits for a pending debounced write to land.
    pub async fn flush(&self) {
        let pending = self.state.lock().await.persist_task.take();
        if let Some(pending) = pending {
            let _ = pending.task.await;
        }
    }

    /// Restarts the debounce timer with a snapshot of the current messages.
    fn schedule_persist(&self, state: &mut ControllerState) {
        let previous = state.persist_task.take().map(|pending| {
            pending.cancel.cancel();
            return pending.task;
        });

        let persistence = self.persistence.clone();
        let messages = state.messages.clone();
        let cancel = CancellationToken::new();
        let debounce = cancel.clone();
        let task = tokio::spawn(async move {
            let superseded = tokio::select! {
                _ = debounce.cancelled() => true,
                _ = tokio::time::sleep(PERSIST_DEBOUNCE) => false,
            };
            // Awaiting the chain means a write that already started always
            // lands first, and whoever awaits this task waits for it too.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if superseded {
                return;
            }
            if is_default_message_set(&messages) {
                persistence.clear().await;
            } else {
                persistence.save(&messages).await;
            }
        });
        state.persist_task = Some(PendingPersist { cancel, task });
    }
}
