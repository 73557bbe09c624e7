use clap::Parser;
use rocketdesk::Settings;
use rocketdesk::cli::commands::{init, watch};
use rocketdesk::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    rocketdesk::logging::init_with_config(&config.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(&std::env::current_dir()?, force),
        Commands::Config => init::run_config(&config),
        Commands::Watch {
            paths,
            debounce_ms,
            file_name,
        } => {
            // Override config with CLI args
            if let Some(ms) = debounce_ms {
                config.watcher.debounce_ms = ms;
            }
            if let Some(name) = file_name {
                config.projects.file_name = name;
            }
            watch::run_watch(&config, paths).await
        }
    }
}
