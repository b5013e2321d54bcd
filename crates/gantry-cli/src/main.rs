mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE};
use gantry_core::install_signal_handler;
use gantry_schema::WorkerConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const DEFAULT_CONFIG: &str = "gantry.toml";

#[derive(Debug, Parser)]
#[command(
    name = "gantry",
    version,
    about = "CI worker that runs pipeline stages in containers"
)]
struct Cli {
    /// Worker configuration file (defaults to ./gantry.toml when present).
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run every configured stage of a pipeline for one event.
    Run {
        /// Path to pipeline TOML file.
        #[arg(default_value = "pipeline.toml")]
        pipeline: PathBuf,
        /// Event identifier used for reporting and resource names.
        #[arg(long)]
        event_id: String,
        /// Ref to check out and to evaluate release conditions against.
        #[arg(long = "ref")]
        git_ref: Option<String>,
        /// Container engine backend (overrides config file).
        #[arg(long)]
        engine: Option<String>,
        /// Workspace directory (overrides config file).
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
    /// Parse and validate a pipeline without running it.
    Validate {
        /// Path to pipeline TOML file.
        #[arg(default_value = "pipeline.toml")]
        pipeline: PathBuf,
    },
    /// Check engine, source tool and workspace prerequisites.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GANTRY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Run {
            pipeline,
            event_id,
            git_ref,
            engine,
            workspace,
        } => load_config(cli.config.as_deref()).and_then(|mut config| {
            if let Some(engine) = engine {
                config.engine = engine;
            }
            if let Some(workspace) = workspace {
                config.workspace = workspace;
            }
            check_prereqs(&config.engine)?;
            commands::run::run(
                &config,
                &pipeline,
                &event_id,
                git_ref.as_deref(),
                json_output,
            )
        }),
        Commands::Validate { pipeline } => commands::validate::run(&pipeline, json_output),
        Commands::Doctor => load_config(cli.config.as_deref())
            .and_then(|config| commands::doctor::run(&config, json_output)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("pipeline error:") || msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

/// Explicit `--config`, else `./gantry.toml` when present, else defaults.
/// Secrets are then overridden from the environment.
fn load_config(path: Option<&Path>) -> Result<WorkerConfig, String> {
    let config = match path {
        Some(path) => WorkerConfig::load(path)
            .map_err(|e| format!("config error: {}: {e}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).is_file() => WorkerConfig::load(Path::new(DEFAULT_CONFIG))
            .map_err(|e| format!("config error: {DEFAULT_CONFIG}: {e}"))?,
        None => WorkerConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn check_prereqs(engine: &str) -> Result<(), String> {
    if engine == "mock" || std::env::var("GANTRY_SKIP_PREREQS").as_deref() == Ok("1") {
        return Ok(());
    }
    let missing = gantry_runtime::check_engine_prereqs(engine);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(gantry_runtime::format_missing(&missing))
    }
}
