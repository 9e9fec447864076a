#[cfg(test)]
#[path = "payload_test.rs"]
mod tests;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ChatMessage;
use super::Role;

pub const TEMPERATURE_MIN: f64 = 0.0;
pub const TEMPERATURE_MAX: f64 = 2.0;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayloadMessage {
    pub role: Role,
    pub content: String,
}

impl From<&ChatMessage> for PayloadMessage {
    fn from(message: &ChatMessage) -> PayloadMessage {
        return PayloadMessage {
            role: message.role,
            content: message.content.to_string(),
        };
    }
}

/// Body of the streaming chat endpoint. Only role and content travel over the
/// wire, never ids or timestamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SendPayload {
    pub messages: Vec<PayloadMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Flattened validation failure, shaped as `{formErrors, fieldErrors}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationDetails {
    pub form_errors: Vec<String>,
    pub field_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationDetails {
    pub fn form(message: &str) -> ValidationDetails {
        return ValidationDetails {
            form_errors: vec![message.to_string()],
            field_errors: BTreeMap::new(),
        };
    }

    pub fn add_field(&mut self, field: &str, message: &str) {
        self.field_errors
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn is_empty(&self) -> bool {
        return self.form_errors.is_empty() && self.field_errors.is_empty();
    }

    pub fn into_result<T>(self, value: T) -> Result<T, ValidationDetails> {
        if self.is_empty() {
            return Ok(value);
        }

        return Err(self);
    }
}

/// Deserializes a JSON request body, reporting malformed JSON and shape
/// mismatches as form level errors.
pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ValidationDetails> {
    return serde_json::from_slice::<T>(body).map_err(|err| {
        return ValidationDetails::form(&err.to_string());
    });
}

pub fn validate_temperature(details: &mut ValidationDetails, temperature: Option<f64>) {
    if let Some(temperature) = temperature {
        if !(TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature) {
            details.add_field(
                "temperature",
                &format!("Number must be between {TEMPERATURE_MIN} and {TEMPERATURE_MAX}"),
            );
        }
    }
}

impl SendPayload {
    pub fn new(
        messages: Vec<PayloadMessage>,
        model: Option<String>,
        temperature: Option<f64>,
    ) -> SendPayload {
        return SendPayload {
            messages,
            model,
            temperature,
        };
    }

    pub fn parse(body: &[u8]) -> Result<SendPayload, ValidationDetails> {
        let payload = parse_json_body::<SendPayload>(body)?;
        return payload.validate();
    }

    pub fn validate(self) -> Result<SendPayload, ValidationDetails> {
        let mut details = ValidationDetails::default();
        if self.messages.is_empty() {
            details.add_field("messages", "Array must contain at least 1 element(s)");
        }
        for (idx, message) in self.messages.iter().enumerate() {
            if message.content.is_empty() {
                details.add_field(
                    &format!("messages.{idx}.content"),
                    "String must contain at least 1 character(s)",
                );
            }
        }
        validate_temperature(&mut details, self.temperature);

        return details.into_result(self);
    }
}
