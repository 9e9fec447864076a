#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::ArgMatches;
use clap::Command;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use strum::EnumIter;
use strum::IntoEnumIterator;
use strum::VariantNames;
use tokio::fs;

use crate::domain::models::DEFAULT_MODEL;
use crate::domain::models::DEFAULT_TEMPERATURE;
use crate::domain::services::DEFAULT_CAPACITY;

static CONFIG: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter, VariantNames, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    ConfigFile,
    ListenAddr,
    ServerUrl,
    UseMock,
    MistralApiKey,
    MistralUrl,
    Model,
    Temperature,
    MockDelayMs,
    MockJitterMs,
    RateLimitCapacity,
    DatasetsDir,
    DataDir,
    AppName,
}

fn app_dir(base: Option<path::PathBuf>) -> path::PathBuf {
    return base
        .unwrap_or_else(|| return path::PathBuf::from("."))
        .join("lechat");
}

pub struct Config {}

impl Config {
    pub fn get(key: ConfigKey) -> String {
        if let Some(val) = CONFIG.get(&key.to_string()) {
            return val.to_string();
        }

        return Config::default(key);
    }

    pub fn set(key: ConfigKey, value: &str) {
        CONFIG.insert(key.to_string(), value.to_string());
    }

    pub fn default(key: ConfigKey) -> String {
        match key {
            ConfigKey::ConfigFile => {
                return app_dir(dirs::config_dir())
                    .join("config.toml")
                    .to_string_lossy()
                    .to_string();
            }
            ConfigKey::ListenAddr => return "127.0.0.1:3000".to_string(),
            ConfigKey::ServerUrl => return "http://127.0.0.1:3000".to_string(),
            ConfigKey::UseMock => return "true".to_string(),
            ConfigKey::MistralApiKey => return "".to_string(),
            ConfigKey::MistralUrl => return "https://api.mistral.ai".to_string(),
            ConfigKey::Model => return DEFAULT_MODEL.to_string(),
            ConfigKey::Temperature => return DEFAULT_TEMPERATURE.to_string(),
            ConfigKey::MockDelayMs => return "120".to_string(),
            ConfigKey::MockJitterMs => return "0".to_string(),
            ConfigKey::RateLimitCapacity => return DEFAULT_CAPACITY.to_string(),
            ConfigKey::DatasetsDir => return "./datasets".to_string(),
            ConfigKey::DataDir => {
                return app_dir(dirs::data_dir()).to_string_lossy().to_string();
            }
            ConfigKey::AppName => return "Le Chat++".to_string(),
        }
    }

    /// Resolves every key: defaults, then the TOML config file, then CLI
    /// flags and environment variables.
    pub async fn load(cmd: Command, clap_arg_matches: Vec<&ArgMatches>) -> Result<()> {
        for key in ConfigKey::iter() {
            Config::set(key, &Config::default(key))
        }

        let mut config_file = Config::default(ConfigKey::ConfigFile);
        for matches in clap_arg_matches.as_slice() {
            if let Ok(Some(arg_config_file)) =
                matches.try_get_one::<String>(&ConfigKey::ConfigFile.to_string())
            {
                config_file = arg_config_file.to_string();
            }
        }

        let config_path = path::PathBuf::from(config_file);
        if config_path.exists() {
            let toml_str = fs::read_to_string(&config_path).await?;
            Config::load_toml(&cmd, &toml_str)?;
        }

        for key in ConfigKey::iter() {
            for matches in clap_arg_matches.as_slice() {
                if let Ok(Some(val)) = matches.try_get_one::<String>(&key.to_string()) {
                    if val.is_empty() {
                        continue;
                    }
                    Config::set(key, val)
                }
            }
        }

        tracing::debug!(
            listen_addr = Config::get(ConfigKey::ListenAddr),
            server_url = Config::get(ConfigKey::ServerUrl),
            use_mock = Config::get(ConfigKey::UseMock),
            model = Config::get(ConfigKey::Model),
            temperature = Config::get(ConfigKey::Temperature),
            datasets_dir = Config::get(ConfigKey::DatasetsDir),
            data_dir = Config::get(ConfigKey::DataDir),
            "config"
        );

        return Ok(());
    }

    fn load_toml(cmd: &Command, toml_str: &str) -> Result<()> {
        let doc = toml_str.parse::<toml_edit::DocumentMut>()?;

        for key in ConfigKey::iter() {
            let val = match doc.get(&key.to_string()) {
                Some(val) => val,
                None => continue,
            };

            let val_str = if let Some(val_bool) = val.as_bool() {
                val_bool.to_string()
            } else if let Some(val_int) = val.as_integer() {
                val_int.to_string()
            } else if let Some(val_float) = val.as_float() {
                val_float.to_string()
            } else if let Some(val_str) = val.as_str() {
                val_str.to_string()
            } else {
                bail!(format!("config.toml has an unsupported value type for key '{key}'"));
            };

            if val_str.is_empty() {
                continue;
            }

            // Use clap value parsers to do validation.
            let possible_values = cmd
                .get_arguments()
                .find(|e| return e.get_long() == Some(key.to_string().as_str()))
                .map(|arg| {
                    return arg
                        .get_possible_values()
                        .iter()
                        .map(|e| return e.get_name().to_string())
                        .collect::<Vec<String>>();
                })
                .unwrap_or_default();

            if !possible_values.is_empty() && !possible_values.contains(&val_str) {
                bail!(format!(
                    "config.toml has an invalid value for key '{key}': {val_str}\nPossible values are: {}",
                    possible_values.join(", ")
                ));
            }

            Config::set(key, &val_str);
        }

        return Ok(());
    }

    pub fn keys() -> &'static [&'static str] {
        return ConfigKey::VARIANTS;
    }

    pub fn serialize_default(cmd: Command) -> String {
        let toml_str = ConfigKey::iter()
            .filter_map(|key| {
                if key == ConfigKey::ConfigFile {
                    return None;
                }

                let arg = cmd
                    .get_arguments()
                    .find(|e| return e.get_long() == Some(key.to_string().as_str()))?;

                let mut description = arg
                    .get_help()
                    .map(|help| return help.to_string())
                    .unwrap_or_default();

                description = description
                    .split("[default:")
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();

                if !arg.get_possible_values().is_empty() {
                    let possible_values = arg
                        .get_possible_values()
                        .iter()
                        .map(|e| return e.get_name())
                        .collect::<Vec<_>>()
                        .join(", ");
                    description = format!("{description} [possible values: {}]", possible_values);
                }

                let mut val = Config::default(key);
                if val.is_empty() {
                    val = format!("# {key} = \"\"");
                } else if val.parse::<f64>().is_ok() || val.parse::<bool>().is_ok() {
                    val = format!("{key} = {val}");
                } else {
                    val = format!("{key} = \"{val}\"");
                }

                return Some(format!("# {description}\n{val}"));
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        return toml_str;
    }
}
