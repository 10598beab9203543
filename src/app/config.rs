use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    DEFAULT_DEBOUNCE_MS, DEFAULT_ENUMERATION_RETRIES, DEFAULT_HISTORY_ENTRIES,
    DEFAULT_MAX_PARSE_BYTES, DEFAULT_QUEUE_CAPACITY,
};
use crate::runtime::ContextSettings;
use crate::trigger::validate_debounce_ms;
use crate::utils::ContextError;

/// Project-local configuration file, relative to the working directory
pub const LOCAL_CONFIG_PATH: &str = ".fimctx/config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Completion trigger configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Visit history configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Parser configuration
    #[serde(default)]
    pub parser: ParserConfig,

    /// Deletion walk configuration
    #[serde(default)]
    pub deletion: DeletionConfig,

    /// Event loop configuration
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Completion trigger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Quiet period after the last edit, in milliseconds
    pub debounce_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Most recently visited files to remember
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_HISTORY_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Files larger than this (in bytes) are never parsed
    pub max_file_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_PARSE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionConfig {
    /// Extra attempts for a directory that fails to enumerate
    pub enumeration_retries: usize,
}

impl Default for DeletionConfig {
    fn default() -> Self {
        Self {
            enumeration_retries: DEFAULT_ENUMERATION_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Bound of the editor event queue
    pub queue_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Config {
    /// Validated orchestrator settings
    ///
    /// Out of range values are replaced by their defaults; each replacement is
    /// returned as a configuration error for the caller to surface.
    pub fn context_settings(&self) -> (ContextSettings, Vec<ContextError>) {
        let mut settings = ContextSettings::default();
        let mut problems = Vec::new();

        match validate_debounce_ms(self.completion.debounce_ms) {
            Ok(duration) => settings.debounce = duration,
            Err(e) => {
                settings.debounce = Duration::from_millis(DEFAULT_DEBOUNCE_MS);
                problems.push(e);
            },
        }

        if self.history.max_entries == 0 {
            problems.push(ContextError::Configuration(format!(
                "history.max_entries must be at least 1; using {}",
                DEFAULT_HISTORY_ENTRIES
            )));
        } else {
            settings.history_entries = self.history.max_entries;
        }

        if self.orchestrator.queue_capacity == 0 {
            problems.push(ContextError::Configuration(format!(
                "orchestrator.queue_capacity must be at least 1; using {}",
                DEFAULT_QUEUE_CAPACITY
            )));
        } else {
            settings.queue_capacity = self.orchestrator.queue_capacity;
        }

        if self.parser.max_file_size == 0 {
            problems.push(ContextError::Configuration(format!(
                "parser.max_file_size must be at least 1; using {}",
                DEFAULT_MAX_PARSE_BYTES
            )));
        }

        settings.enumeration_retries = self.deletion.enumeration_retries;
        (settings, problems)
    }

    /// Parser size limit; 0 falls back to the default (reported by `context_settings`)
    pub fn max_parse_bytes(&self) -> usize {
        if self.parser.max_file_size == 0 {
            DEFAULT_MAX_PARSE_BYTES
        } else {
            self.parser.max_file_size
        }
    }
}

/// Load configuration from multiple sources
pub fn load_config() -> Result<Config> {
    let global_config = get_config_dir()?.join("config.toml");
    load_config_from(Some(&global_config), Path::new(LOCAL_CONFIG_PATH))
}

/// Layer defaults, a global file, a local file and `FIMCTX_` variables
///
/// Nested keys use a double underscore, e.g. `FIMCTX_COMPLETION__DEBOUNCE_MS`.
pub fn load_config_from(global_config: Option<&Path>, local_config: &Path) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if let Some(global_config) = global_config.filter(|path| path.exists()) {
        figment = figment.merge(Toml::file(global_config));
    }

    if local_config.exists() {
        figment = figment.merge(Toml::file(local_config));
    }

    figment = figment.merge(Env::prefixed("FIMCTX_").split("__"));

    figment.extract().context("Failed to load configuration")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", "fimctx") {
        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.to_path_buf())
    } else {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        let config_dir = PathBuf::from(home).join(".config").join("fimctx");
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = if let Some(p) = path {
        p
    } else {
        get_config_dir()?.join("config.toml")
    };

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Create a default configuration file if it doesn't exist
pub fn init_config() -> Result<()> {
    let config_dir = get_config_dir()?;
    let config_file = config_dir.join("config.toml");

    if !config_file.exists() {
        save_config(&Config::default(), Some(config_file.clone()))?;
        println!("Created default configuration at: {}", config_file.display());
    }

    let local_example = PathBuf::from(".fimctx/config.toml.example");
    if !local_example.exists() {
        if let Some(parent) = local_example.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let example_config = r#"# fimctx project configuration
# Values here override the global configuration for this workspace

[completion]
debounce_ms = 300

[history]
max_entries = 50

[parser]
max_file_size = 1048576

[deletion]
enumeration_retries = 2
"#;
        std::fs::write(&local_example, example_config)?;
        println!("Created example configuration at: {}", local_example.display());
    }

    Ok(())
}
