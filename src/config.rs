use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::kernel::aggregator::AggregatorConfig;
use crate::kernel::pipeline::PipelineConfig;
use crate::kernel::worker::WorkerConfig;
use crate::services::broker::{Broker, DiscardBroker, NsqHttpBroker};

/// Top-level configuration, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Stamped into every report as `name`.
    pub name: String,

    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Observation-point file, one `file:line:condition:variable[:primary]`
    /// per line.
    pub slots_path: PathBuf,

    pub pipeline: PipelineSection,

    pub broker: BrokerSection,

    #[serde(default)]
    pub file_sink: FileSinkSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Reports the queue holds before the aggregator blocks. Default: 1000.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Samples that trigger an automatic flush.
    pub batch_limit: u64,

    /// Transport workers draining the queue. Default: 1.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bound on the shutdown join. Default: 30s.
    #[serde(default = "default_join_timeout", with = "humantime_serde")]
    pub join_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    /// Publish to the broker at all. When false every publish is
    /// acknowledged locally and only the file mirror sees the stream.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// nsqd HTTP address, e.g. "127.0.0.1:4151".
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub topic: String,

    #[serde(default)]
    pub handshake_topic: String,

    #[serde(default)]
    pub handshake_payload: String,

    /// Publish failures tolerated per worker.
    pub failure_budget: u64,

    /// Default: 5s.
    #[serde(default = "default_publish_timeout", with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// Default: 10s.
    #[serde(default = "default_handshake_timeout", with = "humantime_serde")]
    pub handshake_timeout: Duration,

    /// Default: 100ms.
    #[serde(default = "default_handshake_retry", with = "humantime_serde")]
    pub handshake_retry: Duration,

    /// Unacknowledged publishes per worker. Default: 64.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSinkSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_join_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_publish_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_handshake_retry() -> Duration {
    Duration::from_millis(100)
}

fn default_max_in_flight() -> usize {
    64
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg = Self::from_yaml(&data)
            .with_context(|| format!("loading config file {}", path.display()))?;

        Ok(cfg)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("parsing config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("name is required");
        }

        if self.pipeline.queue_capacity == 0 {
            bail!("pipeline.queue_capacity must be positive");
        }
        if self.pipeline.batch_limit == 0 {
            bail!("pipeline.batch_limit must be positive");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be positive");
        }
        if self.pipeline.join_timeout.is_zero() {
            bail!("pipeline.join_timeout must be positive");
        }

        if self.broker.max_in_flight == 0 {
            bail!("broker.max_in_flight must be positive");
        }
        if self.broker.handshake_timeout.is_zero() {
            bail!("broker.handshake_timeout must be positive");
        }

        if self.broker.enabled {
            if self.broker.address.is_empty() {
                bail!("broker.address is required when the broker is enabled");
            }
            if self.broker.topic.is_empty() {
                bail!("broker.topic is required when the broker is enabled");
            }
            if self.broker.handshake_topic.is_empty() {
                bail!("broker.handshake_topic is required when the broker is enabled");
            }
        }

        if self.file_sink.enabled && self.file_sink.path.is_none() {
            bail!("file_sink.path is required when the file sink is enabled");
        }

        if !self.broker.enabled && !self.file_sink.enabled {
            bail!("either the broker or the file sink must be enabled");
        }

        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            aggregator: AggregatorConfig {
                name: self.name.clone(),
                batch_limit: self.pipeline.batch_limit,
            },
            queue_capacity: self.pipeline.queue_capacity,
            workers: self.pipeline.workers,
            worker: WorkerConfig {
                topic: self.broker.topic.clone(),
                handshake_topic: self.broker.handshake_topic.clone(),
                handshake_payload: self.broker.handshake_payload.clone(),
                failure_budget: self.broker.failure_budget,
                handshake_timeout: self.broker.handshake_timeout,
                handshake_retry: self.broker.handshake_retry,
                max_in_flight: self.broker.max_in_flight,
            },
            join_timeout: self.pipeline.join_timeout,
            file_sink: if self.file_sink.enabled {
                self.file_sink.path.clone()
            } else {
                None
            },
        }
    }

    /// One broker connection per worker. With the broker disabled every
    /// worker shares a `DiscardBroker`.
    pub fn brokers(&self) -> Result<Vec<Arc<dyn Broker>>> {
        if !self.broker.enabled {
            let discard: Arc<dyn Broker> = Arc::new(DiscardBroker);
            return Ok(vec![discard; self.pipeline.workers]);
        }

        (0..self.pipeline.workers)
            .map(|id| {
                let broker = NsqHttpBroker::new(&self.broker.address, self.broker.publish_timeout)
                    .with_context(|| format!("creating broker client for worker {id}"))?;
                Ok(Arc::new(broker) as Arc<dyn Broker>)
            })
            .collect()
    }
}
