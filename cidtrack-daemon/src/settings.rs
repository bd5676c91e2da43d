//! Effective runtime settings.
//!
//! Precedence, lowest first: built-in defaults, config file, `CIDTRACK_*`
//! environment variables, command-line flags.

use anyhow::Result;

use cidtrack_core::config::{LogSource, TrackerConfig};
use cidtrack_pipeline::{PipelineConfig, PipelineConfigBuilder};

use crate::cli::Cli;
use crate::logging::{LogFormat, effective_level};
use crate::output::OutputFormat;

#[derive(Debug, Clone)]
pub struct Settings {
    /// One entry per active source, deduplicated by directory.
    pub pipelines: Vec<PipelineConfig>,
    pub output: OutputFormat,
    /// Capacity of the shared record channel.
    pub output_capacity: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Settings {
    /// Load the config file named by `--config` (or the defaults), then
    /// apply the command line.
    pub async fn load(cli: &Cli) -> Result<Self> {
        let tracker = match &cli.config {
            Some(path) => TrackerConfig::load(path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))?,
            None => {
                let mut config = TrackerConfig::default();
                config.apply_env_overrides();
                config
                    .validate()
                    .map_err(|e| anyhow::anyhow!("invalid environment override: {}", e))?;
                config
            }
        };
        Self::resolve(tracker, cli)
    }

    /// Apply command-line overrides to an already loaded configuration.
    pub fn resolve(mut tracker: TrackerConfig, cli: &Cli) -> Result<Self> {
        if let Some(path) = &cli.log_path {
            let path = path.display().to_string();
            match tracker.log_sources.iter_mut().find(|s| s.active) {
                Some(source) => source.path = path,
                None => tracker.log_sources.insert(
                    0,
                    LogSource {
                        path,
                        ..LogSource::default()
                    },
                ),
            }
        }

        if let Some(size) = cli.buffer_size {
            if size == 0 {
                anyhow::bail!("--buffer-size must be greater than 0");
            }
            tracker.buffer_size = i64::try_from(size).unwrap_or(i64::MAX);
        }

        if let Some(interval) = cli.poll_interval {
            if interval.is_zero() {
                anyhow::bail!("--poll-interval must be greater than 0");
            }
            tracker.watch_interval = interval;
        }

        let output = match cli.output {
            Some(format) => format,
            None => tracker.output_format.parse()?,
        };
        tracker.output_format = output.as_str().to_owned();

        tracker
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

        let mut pipelines: Vec<PipelineConfig> = Vec::new();
        for source in tracker.log_sources.iter().filter(|s| s.active) {
            let mut config = PipelineConfig::for_source(&tracker, source);
            if let Some(suffix) = &cli.suffix {
                config.suffix.clone_from(suffix);
            }
            if pipelines.iter().any(|p| p.log_dir == config.log_dir) {
                tracing::warn!(path = %config.log_dir.display(), "duplicate log source ignored");
                continue;
            }
            let config = PipelineConfigBuilder::from_config(config).build().map_err(|e| {
                anyhow::anyhow!("invalid settings for source '{}': {}", source.name, e)
            })?;
            pipelines.push(config);
        }

        if pipelines.is_empty() {
            anyhow::bail!("no active log source configured");
        }

        Ok(Self {
            pipelines,
            output,
            output_capacity: tracker.channel_capacity(),
            log_level: effective_level(cli.verbose, &tracker.log_level).to_owned(),
            log_format: cli.log_format,
        })
    }
}
