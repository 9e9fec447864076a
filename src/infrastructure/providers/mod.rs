#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;

pub mod mistral;
pub mod mock;

use anyhow::Result;

use crate::configuration::ServerEnv;
use crate::domain::models::ProviderBox;

pub struct ProviderManager {}

impl ProviderManager {
    /// Picks the provider for this request's configuration. Live mode without
    /// an API key is an error.
    pub fn get(env: &ServerEnv) -> Result<ProviderBox> {
        if env.use_mock {
            return Ok(Box::new(mock::Mock::from_env(env)));
        }

        return Ok(Box::new(mistral::Mistral::from_env(env)?));
    }
}
