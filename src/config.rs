//! Configuration for the embedded interpreter binding
//!
//! Loaded from TOML, with environment overrides for logging:
//!
//! ```toml
//! [interpreter]
//! file_mode = "r"
//! finalize_on_drop = true
//!
//! [modes]      # only needed when targeting a runtime with other start tokens
//! eval = 258
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! output = { kind = "file", directory = "logs", prefix = "embedpy" }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{BindingError, Result};
use crate::logging::{parse_level, LogConfig, LogFormat, LogOutput};
use crate::runtime::ModeOverrides;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbedConfig {
    #[serde(default)]
    pub interpreter: InterpreterConfig,

    #[serde(default)]
    pub modes: ModeOverrides,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// `fopen` mode used by run-file
    #[serde(default = "default_file_mode")]
    pub file_mode: String,

    /// Finalize the runtime when the `Interpreter` is dropped
    #[serde(default = "default_true")]
    pub finalize_on_drop: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            file_mode: default_file_mode(),
            finalize_on_drop: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: LogFormat,

    #[serde(default = "default_output")]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: bool,

    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            output: default_output(),
            span_events: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn to_log_config(&self) -> LogConfig {
        let mut config = LogConfig::new()
            .with_level(parse_level(&self.level))
            .with_format(self.format)
            .with_output(self.output.clone())
            .with_span_events(self.span_events);
        if let Some(filter) = &self.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }
}

impl EmbedConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| BindingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `EMBEDPY_*` environment overrides
    ///
    /// - `EMBEDPY_LOG_LEVEL`: trace, debug, info, warn, error
    /// - `EMBEDPY_LOG_FORMAT`: pretty, compact, json
    /// - `EMBEDPY_LOG_FILE`: directory for daily-rolling log files
    pub fn with_env(self) -> Self {
        self.with_vars(|key| std::env::var(key).ok())
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = var("EMBEDPY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("EMBEDPY_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "pretty" => self.logging.format = LogFormat::Pretty,
                "compact" => self.logging.format = LogFormat::Compact,
                "json" => self.logging.format = LogFormat::Json,
                _ => {}
            }
        }
        if let Some(directory) = var("EMBEDPY_LOG_FILE") {
            self.logging.output = LogOutput::File {
                directory,
                prefix: "embedpy".to_string(),
            };
        }
        self
    }

    /// Reject settings that would make run-file write to the script
    ///
    /// `Interpreter::with_config` calls this, so hand-built configs are
    /// checked too.
    pub fn validate(&self) -> Result<()> {
        let mode = self.interpreter.file_mode.as_str();
        if !READ_MODES.contains(&mode) {
            return Err(BindingError::Config(format!(
                "interpreter.file_mode must be one of {:?}, got {:?}",
                READ_MODES, mode
            )));
        }
        Ok(())
    }
}

/// `fopen` modes that open read-only
const READ_MODES: [&str; 3] = ["r", "rb", "rt"];

fn default_file_mode() -> String {
    "r".to_string()
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Compact
}

fn default_output() -> LogOutput {
    LogOutput::Stderr
}
