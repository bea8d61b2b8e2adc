use crate::logging::layers::console::ConsoleOutput;
use crate::Result;
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::filter::Directive;

const DEFAULT_LEVEL: &str = "info";

/// `[logging]` section of the config file after environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory of `microflow.log`; defaults to `~/.microflow/logs`.
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset.
    pub default_level: String,
    pub enable_file: bool,
    pub console_output: ConsoleOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            default_level: DEFAULT_LEVEL.to_string(),
            enable_file: false,
            console_output: ConsoleOutput::default(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        for directive in self.default_level.split(',').filter(|d| !d.trim().is_empty()) {
            Directive::from_str(directive.trim()).map_err(|_| {
                anyhow!(
                    "logging.default_level '{}' is not a valid tracing directive",
                    self.default_level
                )
            })?;
        }
        if let Some(dir) = &self.log_dir {
            if dir.as_os_str().is_empty() {
                return Err(anyhow!("logging.log_dir cannot be empty"));
            }
        }
        Ok(())
    }
}
