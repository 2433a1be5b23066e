use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};

use local_translate_lib::commands::{Commands, ModelInfo};
use local_translate_lib::config::{AppConfig, FileConfigStore};
use local_translate_lib::models::{find_model, DownloadProgress, FnSink, ModelFamily};
use local_translate_lib::{setup, worker, CommandError, Error};

#[derive(Debug, Parser)]
#[command(name = "local-translate", version, about)]
struct Cli {
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    /// Path of the JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Serve gateway commands as JSON lines on stdin/stdout
    Serve,
    /// Run a model worker (spawned by the supervisor)
    Worker {
        #[arg(long)]
        family: ModelFamily,
    },
    /// List models of both families with their status
    Models,
    /// Download a model into the cache
    Download { model_id: String },
    /// Show or change the stored config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective config (environment overrides applied)
    Show,
    /// Write the current settings to the config file for editing
    Init,
    /// Remove the stored settings so defaults apply
    Reset,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    local_translate_lib::log::init(cli.log_level);

    if let CliCommand::Worker { family } = cli.command {
        return worker::run_builtin(family);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config_path = match cli.config {
        Some(path) => path,
        None => FileConfigStore::default_path(),
    };
    let store = FileConfigStore::open(config_path)?;
    if let CliCommand::Config { action } = &cli.command {
        return run_config(&store, action);
    }
    let config = AppConfig::load(&store);
    let commands = setup::build_commands(&config)?;
    info!("local-translate v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        CliCommand::Serve => {
            let input = tokio::io::BufReader::new(tokio::io::stdin());
            local_translate_lib::server::serve(commands.clone(), input, tokio::io::stdout()).await?;
        }
        CliCommand::Models => {
            let mut models = commands.list_models().await?;
            models.push(tts_info(&commands).await?);
            println!("{}", serde_json::to_string_pretty(&models)?);
        }
        CliCommand::Download { model_id } => {
            let sink = Arc::new(FnSink(|p: DownloadProgress| {
                eprintln!("[{:>5.1}%] {}", p.progress * 100.0, p.message);
            }));

            let model = find_model(&model_id)
                .ok_or_else(|| CommandError::UnknownModel(model_id.clone()))?;
            let cancel_id = model_id.clone();
            let cancel_commands = commands.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, cancelling download");
                    let _ = cancel_commands.cancel_download(cancel_id).await;
                }
            });

            let status = match model.family {
                ModelFamily::Translation => commands.download_model(model_id, sink).await?.status,
                ModelFamily::Tts => commands.download_tts_model(sink).await?.status,
            };
            println!("{}", status);
        }
        CliCommand::Worker { .. } | CliCommand::Config { .. } => {}
    }

    commands.shutdown().await;
    Ok(())
}

fn run_config(store: &FileConfigStore, action: &ConfigAction) -> Result<(), Error> {
    match action {
        ConfigAction::Show => {
            let config = AppConfig::load(store);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Init => {
            AppConfig::stored(store).save(store)?;
            info!("Wrote config to {:?}", store.path());
        }
        ConfigAction::Reset => {
            AppConfig::reset(store)?;
            info!("Reset config at {:?}", store.path());
        }
    }
    Ok(())
}

async fn tts_info(commands: &Commands) -> Result<ModelInfo, Error> {
    let (model, snapshot) = commands
        .tts()
        .list()
        .into_iter()
        .next()
        .ok_or_else(|| CommandError::Internal("no TTS model in catalog".into()))?;
    Ok(ModelInfo::new(model, snapshot))
}
