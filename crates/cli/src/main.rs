mod config_commands;
mod plugin_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "subhost",
    about = "subhost: run subcommand plugins in isolated environments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/subhost/).
    #[arg(long, global = true, env = "SUBHOST_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
    /// Custom data directory holding plugins, environments and tool storage.
    #[arg(long, global = true, env = "SUBHOST_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover plugins, provision their environments and clean up leftovers.
    Update,
    /// Print every known plugin with its status and input schema as JSON.
    List,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Run a plugin: `subhost <name> [payload] [--timeout SECS]`.
    #[command(external_subcommand)]
    Dispatch(Vec<String>),
}

/// Logs go to stderr; stdout carries JSON results only.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    if let Some(ref dir) = cli.config_dir {
        subhost_config::set_config_dir(dir.clone());
    }
    if let Some(ref dir) = cli.data_dir {
        subhost_config::set_data_dir(dir.clone());
    }

    let config = subhost_config::discover_and_load();
    let data_dir = subhost_config::data_dir();
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        "subhost starting"
    );

    match cli.command {
        Commands::Update => plugin_commands::update(&config, &data_dir).await,
        Commands::List => plugin_commands::list(&config, &data_dir),
        Commands::Config { action } => config_commands::handle_config(action, &config, &data_dir),
        Commands::Dispatch(args) => plugin_commands::dispatch(&config, &data_dir, args).await,
    }
}
