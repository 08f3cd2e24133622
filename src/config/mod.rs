//! Configuration module for flowline
//!
//! A [`FlowConfig`] describes how a pipeline is started: the capacity of
//! the channels between stages and how stage work is pooled. It can be
//! kept on disk as JSON or TOML; the format follows the file extension.
//!
//! # Example
//!
//! ```ignore
//! use flowline::config::FlowConfig;
//! use flowline::pipeline::Pipeline;
//!
//! let config = FlowConfig::load("flowline.toml")?;
//! let mut pipeline = Pipeline::<String>::new(config.buffer_size);
//! pipeline.run(|unit| println!("{}", unit), config.run_options())?;
//! ```

use crate::error::{FlowError, Result, ResultExt};
use crate::pipeline::{with_options, Options, RunOption, DEFAULT_POOL_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default capacity of every inter-stage channel
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// On-disk formats understood by [`FlowConfig::load`] and [`FlowConfig::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension. Anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Startup configuration of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Capacity of each channel between stages (0 = rendezvous)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum concurrent tasks per stage pool
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Maximum worker threads per pool (0 = derived from the core count)
    #[serde(default)]
    pub max_workers: usize,
    /// Run stage work on worker pools instead of the dispatcher thread
    #[serde(default = "default_true")]
    pub pool_enabled: bool,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            max_workers: 0,
            pool_enabled: true,
        }
    }
}

impl FlowConfig {
    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::parse(&content, ConfigFormat::from_path(path))
            .map_err(|e| e.with_context(format!("Failed to load {:?}", path)))
    }

    /// Load a configuration file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| FlowError::Serialization(format!("Invalid JSON config: {}", e))),
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| FlowError::Serialization(format!("Invalid TOML config: {}", e))),
        }
    }

    /// Save the configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| FlowError::Serialization(e.to_string()))?,
            ConfigFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| FlowError::Serialization(e.to_string()))?
            }
        };

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file {:?}", path))?;
        tracing::debug!("Saved config to {:?}", path);
        Ok(())
    }

    /// Engine options described by this configuration
    pub fn options(&self) -> Options {
        Options {
            pool_size: self.pool_size,
            max_workers: self.max_workers,
            disable_pool: !self.pool_enabled,
        }
    }

    /// Options ready to pass to `Pipeline::run`
    pub fn run_options(&self) -> Vec<RunOption> {
        vec![with_options(self.options())]
    }
}
