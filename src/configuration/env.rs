#[cfg(test)]
#[path = "env_test.rs"]
mod tests;

use std::path;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;

use super::Config;
use super::ConfigKey;
use crate::domain::models::RunMode;
use crate::domain::models::TEMPERATURE_MAX;
use crate::domain::models::TEMPERATURE_MIN;

/// A typed snapshot of the server side configuration, taken once per request.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerEnv {
    pub use_mock: bool,
    pub mistral_api_key: Option<String>,
    pub mistral_url: String,
    pub model: String,
    pub temperature: f64,
    pub mock_delay_ms: u64,
    pub mock_jitter_ms: u64,
    pub rate_limit_capacity: u32,
    pub datasets_dir: path::PathBuf,
    pub app_name: String,
}

fn parse_key<T: std::str::FromStr>(key: ConfigKey, val: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    return val
        .trim()
        .parse::<T>()
        .map_err(|err| return anyhow!("Invalid value for '{key}': {val} ({err})"));
}

impl ServerEnv {
    pub fn resolve() -> Result<ServerEnv> {
        return ServerEnv::from_lookup(Config::get);
    }

    /// Builds the snapshot from any key lookup. Values are validated here so
    /// a bad setting names its key.
    pub fn from_lookup<F: Fn(ConfigKey) -> String>(lookup: F) -> Result<ServerEnv> {
        let use_mock = match lookup(ConfigKey::UseMock).trim() {
            "true" => true,
            "false" => false,
            val => bail!(
                "Invalid value for '{}': {val} (expected true or false)",
                ConfigKey::UseMock
            ),
        };

        let temperature =
            parse_key::<f64>(ConfigKey::Temperature, &lookup(ConfigKey::Temperature))?;
        if !(TEMPERATURE_MIN..=TEMPERATURE_MAX).contains(&temperature) {
            bail!(
                "Invalid value for '{}': {temperature} (must be between {TEMPERATURE_MIN} and {TEMPERATURE_MAX})",
                ConfigKey::Temperature
            );
        }

        let api_key = lookup(ConfigKey::MistralApiKey);
        let mistral_api_key = if api_key.trim().is_empty() {
            None
        } else {
            Some(api_key.trim().to_string())
        };

        return Ok(ServerEnv {
            use_mock,
            mistral_api_key,
            mistral_url: lookup(ConfigKey::MistralUrl)
                .trim_end_matches('/')
                .to_string(),
            model: lookup(ConfigKey::Model),
            temperature,
            mock_delay_ms: parse_key(ConfigKey::MockDelayMs, &lookup(ConfigKey::MockDelayMs))?,
            mock_jitter_ms: parse_key(ConfigKey::MockJitterMs, &lookup(ConfigKey::MockJitterMs))?,
            rate_limit_capacity: parse_key(
                ConfigKey::RateLimitCapacity,
                &lookup(ConfigKey::RateLimitCapacity),
            )?,
            datasets_dir: path::PathBuf::from(lookup(ConfigKey::DatasetsDir)),
            app_name: lookup(ConfigKey::AppName),
        });
    }

    pub fn mode(&self) -> RunMode {
        if self.use_mock {
            return RunMode::Mock;
        }

        return RunMode::Real;
    }
}
