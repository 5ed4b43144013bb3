use std::{path::PathBuf, sync::OnceLock};

use config::{Config, File};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read the configuration file: {0}")]
    UnableToReadConfig(#[from] config::ConfigError),
}

/// Configuration for the analysis tool. Fields missing from the file keep their defaults.
#[derive(Debug, serde::Deserialize)]
#[serde(default)]
pub struct BlunderscopeConfig {
    /// Path of the UCI engine binary used when the command line does not name one.
    pub engine_path: String,

    /// Default per-move analysis budget in milliseconds.
    pub movetime_ms: u64,

    /// Indicate if number output should be precise. If false, some output will be printed in a more human-readable
    /// format.
    pub precise: bool,
}

impl Default for BlunderscopeConfig {
    fn default() -> Self {
        Self { engine_path: "stockfish".to_string(), movetime_ms: 2000, precise: false }
    }
}

static CONFIG: OnceLock<BlunderscopeConfig> = OnceLock::new();

/// Get the configuration of the tool. Falls back to the built-in defaults when `initialize` was not called.
pub fn get_config() -> &'static BlunderscopeConfig {
    CONFIG.get_or_init(BlunderscopeConfig::default)
}

fn get_config_path() -> Option<PathBuf> {
    let config_filename = "blunderscope.toml";

    // Check several possible locations for the config file
    let paths = [PathBuf::from(config_filename), PathBuf::from("assets/config").join(config_filename)];
    paths.into_iter().find(|path| path.exists())
}

/// Initialize the configuration of the tool. A missing config file is not an error; the defaults apply.
pub fn initialize() -> Result<(), ConfigError> {
    let config = match get_config_path() {
        Some(path) => {
            let settings = Config::builder().add_source(File::from(path)).build()?;
            settings.try_deserialize()?
        }
        None => BlunderscopeConfig::default(),
    };

    // A second initialization keeps the first configuration; that only happens in tests.
    let _ = CONFIG.set(config);

    Ok(())
}
