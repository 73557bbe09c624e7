//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

#[derive(Parser, Debug)]
#[command(
    name = "rocketdesk",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch project folders and keep an in-memory index of them",
    styles = clap_cargo_style(),
)]
pub struct Cli {
    /// Path to a settings file instead of the discovered .rocketdesk/settings.toml
    #[arg(short, long, global = true, env = "RD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Set up .rocketdesk directory with default settings
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// Watch project roots and log index changes until Ctrl-C
    Watch {
        /// Roots to watch (defaults to projects.paths from settings)
        paths: Vec<PathBuf>,

        /// Debounce window in milliseconds (overrides settings)
        #[arg(long)]
        debounce_ms: Option<u64>,

        /// Manifest file name that marks a project (overrides settings)
        #[arg(long)]
        file_name: Option<String>,
    },
}
