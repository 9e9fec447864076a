#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

use std::io;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::EvalRequest;

/// What to run once configuration is loaded.
#[derive(Clone, Debug, PartialEq)]
pub enum Run {
    Serve,
    Chat,
    Lab(LabArgs),
    Eval(EvalArgs),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LabArgs {
    pub system_a: String,
    pub system_b: String,
    pub user: String,
    pub export: Option<path::PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalArgs {
    pub request: EvalRequest,
    pub csv: Option<path::PathBuf>,
    pub json: Option<path::PathBuf>,
}

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        bail!(format!(
            "Config file already exists at {config_file_path_str}"
        ));
    }

    if let Some(parent) = config_file_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut file = fs::File::create(&config_file_path).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!("Created default config file at {config_file_path_str}");
    return Ok(());
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. This command will fail if the file exists already.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        )
        .subcommand(
            Command::new("keys").about("List all config keys as strings.")
        );
}

fn subcommand_lab() -> Command {
    return Command::new("lab")
        .about("Run one user prompt against two system prompts side by side.")
        .arg(
            Arg::new("system-a")
                .long("system-a")
                .help("System prompt for run A.")
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("system-b")
                .long("system-b")
                .help("System prompt for run B.")
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .help("User prompt sent to both runs.")
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("export")
                .long("export")
                .help("Write completed runs as JSON lines to this file.")
                .num_args(1)
                .value_parser(value_parser!(path::PathBuf)),
        );
}

fn subcommand_eval() -> Command {
    return Command::new("eval")
        .about("Score a dataset against one or two system prompts.")
        .arg(
            Arg::new("dataset")
                .short('d')
                .long("dataset")
                .help("Dataset name, resolved to <datasets-dir>/<name>.jsonl on the server.")
                .num_args(1)
                .required(true),
        )
        .arg(
            Arg::new("prompt-a")
                .long("prompt-a")
                .help("System prompt for set A.")
                .num_args(1),
        )
        .arg(
            Arg::new("prompt-b")
                .long("prompt-b")
                .help("System prompt for set B. Set B only runs when given.")
                .num_args(1),
        )
        .arg(
            Arg::new("eval-model")
                .long("eval-model")
                .help("Model requested for every item. Defaults to the server's model.")
                .num_args(1),
        )
        .arg(
            Arg::new("eval-temperature")
                .long("eval-temperature")
                .help("Temperature requested for every item, between 0 and 2.")
                .num_args(1)
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("csv")
                .long("csv")
                .help("Write the report as CSV to this file.")
                .num_args(1)
                .value_parser(value_parser!(path::PathBuf)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Write the report as JSON to this file.")
                .num_args(1)
                .value_parser(value_parser!(path::PathBuf)),
        );
}

fn arg_config(key: ConfigKey, env: &'static str, help: &str) -> Arg {
    let default = Config::default(key);
    let help = if default.is_empty() {
        help.to_string()
    } else {
        format!("{help} [default: {default}]")
    };

    return Arg::new(key.to_string())
        .long(key.to_string())
        .env(env)
        .num_args(1)
        .help(help)
        .global(true);
}

pub fn build() -> Command {
    let about = format!(
        "{}\n\nVersion: {}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
    );

    return Command::new("lechat")
        .about(about)
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .arg_required_else_help(false)
        .subcommand(Command::new("serve").about("Start the HTTP server."))
        .subcommand(
            Command::new("chat")
                .about("Start an interactive chat session against a running server."),
        )
        .subcommand(subcommand_lab())
        .subcommand(subcommand_eval())
        .subcommand(subcommand_completions())
        .subcommand(subcommand_config())
        .arg(
            arg_config(ConfigKey::ConfigFile, "LECHAT_CONFIG_FILE", "Path to configuration file")
                .short('c'),
        )
        .arg(arg_config(
            ConfigKey::ListenAddr,
            "LECHAT_LISTEN_ADDR",
            "Address the HTTP server binds to.",
        ))
        .arg(arg_config(
            ConfigKey::ServerUrl,
            "LECHAT_SERVER_URL",
            "Base URL of a running server, used by the chat, lab and eval commands.",
        ))
        .arg(
            arg_config(
                ConfigKey::UseMock,
                "USE_MOCK",
                "Serve the local mock generator instead of calling Mistral.",
            )
            .value_parser(PossibleValuesParser::new(["true", "false"])),
        )
        .arg(
            arg_config(
                ConfigKey::MistralApiKey,
                "MISTRAL_API_KEY",
                "Mistral API key. Required when use-mock is false.",
            )
            .hide_env_values(true),
        )
        .arg(arg_config(
            ConfigKey::MistralUrl,
            "MISTRAL_URL",
            "Mistral API URL. Can be swapped to a compatible proxy.",
        ))
        .arg(
            arg_config(
                ConfigKey::Model,
                "MISTRAL_MODEL",
                "Model used when a request does not name one.",
            )
            .short('m'),
        )
        .arg(arg_config(
            ConfigKey::Temperature,
            "TEMPERATURE_DEFAULT",
            "Sampling temperature used when a request does not set one, between 0 and 2.",
        ))
        .arg(arg_config(
            ConfigKey::MockDelayMs,
            "MOCK_DELAY_MS",
            "Delay in milliseconds between mock tokens.",
        ))
        .arg(arg_config(
            ConfigKey::MockJitterMs,
            "MOCK_JITTER_MS",
            "Upper bound in milliseconds of random extra delay added to each mock token. 0 disables jitter.",
        ))
        .arg(arg_config(
            ConfigKey::RateLimitCapacity,
            "RATE_LIMIT_CAPACITY",
            "Requests each client may burst on the streaming endpoint, refilled over five minutes.",
        ))
        .arg(arg_config(
            ConfigKey::DatasetsDir,
            "LECHAT_DATASETS_DIR",
            "Directory holding evaluation datasets as <name>.jsonl files.",
        ))
        .arg(arg_config(
            ConfigKey::DataDir,
            "LECHAT_DATA_DIR",
            "Directory where the chat conversation is saved between sessions.",
        ))
        .arg(arg_config(ConfigKey::AppName, "LECHAT_APP_NAME", "Display name of the application."));
}

fn get_string(matches: &ArgMatches, id: &str) -> Option<String> {
    return matches.get_one::<String>(id).map(|val| return val.to_string());
}

fn lab_args(matches: &ArgMatches) -> LabArgs {
    return LabArgs {
        system_a: get_string(matches, "system-a").unwrap_or_default(),
        system_b: get_string(matches, "system-b").unwrap_or_default(),
        user: get_string(matches, "user").unwrap_or_default(),
        export: matches.get_one::<path::PathBuf>("export").cloned(),
    };
}

fn eval_args(matches: &ArgMatches) -> EvalArgs {
    return EvalArgs {
        request: EvalRequest {
            dataset: get_string(matches, "dataset").unwrap_or_default(),
            prompt_a: get_string(matches, "prompt-a"),
            prompt_b: get_string(matches, "prompt-b"),
            model: get_string(matches, "eval-model"),
            temperature: matches.get_one::<f64>("eval-temperature").copied(),
        },
        csv: matches.get_one::<path::PathBuf>("csv").cloned(),
        json: matches.get_one::<path::PathBuf>("json").cloned(),
    };
}

/// Resolves the command line into something to run. Returns `None` when the
/// command was fully handled here.
pub async fn parse_from(matches: ArgMatches) -> Result<Option<Run>> {
    match matches.subcommand() {
        Some(("serve", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            return Ok(Some(Run::Serve));
        }
        Some(("chat", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            return Ok(Some(Run::Chat));
        }
        Some(("lab", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            return Ok(Some(Run::Lab(lab_args(subcmd_matches))));
        }
        Some(("eval", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            return Ok(Some(Run::Eval(eval_args(subcmd_matches))));
        }
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }
            return Ok(None);
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
                return Ok(None);
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
                return Ok(None);
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
                return Ok(None);
            }
            Some(("keys", _)) => {
                println!("{}", Config::keys().join("\n"));
                return Ok(None);
            }
            _ => {
                subcommand_config().print_long_help()?;
                return Ok(None);
            }
        },
        _ => {
            Config::load(build(), vec![&matches]).await?;
            return Ok(Some(Run::Chat));
        }
    }
}

pub async fn parse() -> Result<Option<Run>> {
    return parse_from(build().get_matches()).await;
}
