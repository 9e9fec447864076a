#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;

pub const DEFAULT_MODEL: &str = "mistral-small";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub model: String,
    pub temperature: f64,
}

impl Default for StreamSettings {
    fn default() -> StreamSettings {
        return StreamSettings {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        };
    }
}

/// A partially specified set of stream settings. Unset fields fall through to
/// the next layer during resolution.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl StreamSettings {
    /// Overlays `layer` on top of self. Empty model names are ignored.
    pub fn merge(&self, layer: &PartialSettings) -> StreamSettings {
        let mut merged = self.clone();
        if let Some(model) = &layer.model {
            if !model.is_empty() {
                merged.model = model.to_string();
            }
        }
        if let Some(temperature) = layer.temperature {
            merged.temperature = temperature;
        }

        return merged;
    }

    /// Explicit override > server reported config > hardcoded default.
    pub fn resolve(overrides: &PartialSettings, server: &PartialSettings) -> StreamSettings {
        return StreamSettings::default().merge(server).merge(overrides);
    }
}
