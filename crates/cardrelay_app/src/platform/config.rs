use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use cardrelay_engine::{EngineConfig, RetryPolicy};
use serde::Deserialize;

use super::logging::LogDestination;

pub(crate) const CONFIG_FILENAME: &str = "cardrelay.ron";
const STATE_DIRNAME: &str = ".cardrelay";

/// Optional overrides read from `cardrelay.ron`. Anything left out keeps
/// the engine default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub service_url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub probe_attempts: Option<u32>,
    pub probe_interval_ms: Option<u64>,
    pub identity_attempts: Option<u32>,
    pub identity_interval_ms: Option<u64>,
    pub resume_limit: Option<u32>,
    pub turnaround_timeout_ms: Option<u64>,
    /// `0` disables the outcome deadline.
    pub outcome_timeout_ms: Option<u64>,
    pub message_ttl_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
    pub state_dir: Option<PathBuf>,
    pub log_to: Option<LogDestination>,
    pub verbose: Option<bool>,
}

impl ConfigFile {
    /// A missing file is an empty configuration.
    pub(crate) fn read(path: &Path) -> anyhow::Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("reading {}", path.display())),
        };
        ron::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub(crate) fn engine_config(&self, working_dir: &Path) -> EngineConfig {
        let state_dir = match &self.state_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => working_dir.join(dir),
            None => working_dir.join(STATE_DIRNAME),
        };
        let mut config = EngineConfig::default_with_state_dir(state_dir);

        if let Some(url) = &self.service_url {
            config.service.base_url = url.clone();
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.service.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.request_timeout_ms {
            config.service.request_timeout = Duration::from_millis(ms);
        }
        config.probe = overlay(config.probe, self.probe_attempts, self.probe_interval_ms);
        config.identity = overlay(
            config.identity,
            self.identity_attempts,
            self.identity_interval_ms,
        );
        config.resume = overlay(config.resume, self.resume_limit, None);
        if let Some(ms) = self.turnaround_timeout_ms {
            config.turnaround_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.outcome_timeout_ms {
            config.outcome_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = self.message_ttl_ms {
            config.message_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = self.sweep_interval_ms {
            // A zero period would make the sweep timer panic.
            config.sweep_interval = Duration::from_millis(ms.max(1));
        }
        config
    }

    pub(crate) fn log_destination(&self) -> LogDestination {
        self.log_to.unwrap_or_default()
    }

    pub(crate) fn log_level(&self) -> log::LevelFilter {
        if self.verbose.unwrap_or(false) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

fn overlay(policy: RetryPolicy, attempts: Option<u32>, interval_ms: Option<u64>) -> RetryPolicy {
    RetryPolicy::new(
        attempts.unwrap_or(policy.max_attempts),
        interval_ms.map_or(policy.interval, Duration::from_millis),
    )
}
