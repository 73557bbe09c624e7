//! Layered settings for the data-plane.
//!
//! Sources, lowest to highest precedence:
//! - built-in defaults
//! - `.rocketdesk/settings.toml`, found by walking up from the current directory
//! - environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RD_` and use double underscores
//! to separate nested levels:
//! - `RD_WATCHER__DEBOUNCE_MS=2000` sets `watcher.debounce_ms`
//! - `RD_STORE__DEFAULT_PAGE_SIZE=100` sets `store.default_page_size`
//! - `RD_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".rocketdesk";

/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

const ENV_PREFIX: &str = "RD_";

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,

    /// File watcher tuning
    #[serde(default)]
    pub watcher: WatcherSettings,

    /// In-memory index tuning
    #[serde(default)]
    pub store: StoreConfig,

    /// Project roots observed by the `watch` command
    #[serde(default)]
    pub projects: ProjectsConfig,
}

/// Log level configuration.
///
/// `default` applies to every target; `modules` overrides per target,
/// e.g. `rocketdesk::watcher = "debug"`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub default: String,

    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherSettings {
    /// Quiet period before a burst of changes to one object is handled
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Page size used by `List` when the caller gives none
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Edit distance for free-text matching (tantivy caps it at 2)
    #[serde(default = "default_fuzziness")]
    pub fuzziness: u8,

    /// Memory budget handed to the index writer
    #[serde(default = "default_writer_memory")]
    pub writer_memory_bytes: usize,

    /// Also emit `store.insert` when a document is created, not only updated
    #[serde(default)]
    pub notify_on_create: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProjectsConfig {
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Manifest file that marks a directory as a project
    #[serde(default = "default_project_file")]
    pub file_name: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_page_size() -> usize {
    50
}
fn default_fuzziness() -> u8 {
    2
}
fn default_writer_memory() -> usize {
    20_000_000
}
fn default_project_file() -> String {
    "rocketfile.yaml".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl WatcherSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            fuzziness: default_fuzziness(),
            writer_memory_bytes: default_writer_memory(),
            notify_on_create: false,
        }
    }
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            file_name: default_project_file(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honouring env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting, single underscore stays in the key
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.rocketdesk/settings.toml` in the current directory or an ancestor.
    pub fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Write the settings as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file under `dir`.
    ///
    /// Fails if the file exists and `force` is false.
    pub fn init_config_file(dir: impl AsRef<Path>, force: bool) -> anyhow::Result<PathBuf> {
        let config_path = dir.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            anyhow::bail!(
                "Configuration file already exists at {}. Use --force to overwrite",
                config_path.display()
            );
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
