use super::ChatMessage;
use super::LabLabel;
use super::LabRunRecord;

/// State changes published by a chat session for front ends to render.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    MessageAppended(ChatMessage),
    MessageDelta { id: String, text: String },
    StreamFinished {
        latency_ms: Option<f64>,
        error: Option<String>,
    },
    Cleared(Vec<ChatMessage>),
    Restored(Vec<ChatMessage>),
}

/// State changes published by a lab runner.
#[derive(Clone, Debug, PartialEq)]
pub enum LabEvent {
    Started(LabLabel),
    Delta { label: LabLabel, text: String },
    Failed { label: LabLabel, message: String },
    Finished(LabRunRecord),
}
