use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use super::types::{Config, WriterConfig};

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        debug!(path = %path.display(), "loading configuration");

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(yaml).context("failed to parse YAML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let listener = &self.listener;

        if listener.port == 0 {
            anyhow::bail!("listener port must be non-zero");
        }
        if listener.backlog == 0 {
            anyhow::bail!("listener backlog must be positive");
        }
        if listener.read_buffer_size == 0 {
            anyhow::bail!("listener read_buffer_size must be positive");
        }
        if listener.max_record_bytes == 0 {
            anyhow::bail!("listener max_record_bytes must be positive");
        }

        self.normalize
            .converter()
            .context("invalid normalize section")?;

        if self.store.writers.is_empty() {
            anyhow::bail!("at least one store writer must be defined");
        }
        if self.store.queue_capacity == 0 {
            anyhow::bail!("store queue_capacity must be positive");
        }
        if self.store.flush_interval.is_zero() {
            anyhow::bail!("store flush_interval must be positive");
        }

        for writer in &self.store.writers {
            match writer {
                WriterConfig::File(file) if file.path.as_os_str().is_empty() => {
                    anyhow::bail!("file writer path must not be empty");
                }
                WriterConfig::Memory(memory) if memory.max_records == 0 => {
                    anyhow::bail!("memory writer max_records must be positive");
                }
                _ => {}
            }
        }

        if !(0.0..=1.0).contains(&self.telemetry.trace_sample_rate) {
            anyhow::bail!("trace_sample_rate must be between 0.0 and 1.0");
        }

        info!("configuration validated successfully");
        Ok(())
    }
}
