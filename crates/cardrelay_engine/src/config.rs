use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Where and how to reach the card generation service.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            connect_timeout: Duration::from_secs(10),
            // Rendering a card with a QR code is slow on the service side.
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub service: ServiceSettings,
    /// Readiness probing budget.
    pub probe: RetryPolicy,
    /// Agent-side "who am I" budget.
    pub identity: RetryPolicy,
    /// Ceiling for resubmitting interrupted messages.
    pub resume: RetryPolicy,
    /// Deadline for a single transport round trip.
    pub turnaround_timeout: Duration,
    /// Deadline for the out-of-band outcome once a message is processing.
    pub outcome_timeout: Option<Duration>,
    /// How long terminal messages are kept before collection.
    pub message_ttl: Duration,
    pub sweep_interval: Duration,
    /// Directory holding the last-result slot.
    pub state_dir: PathBuf,
}

impl EngineConfig {
    pub fn default_with_state_dir(state_dir: PathBuf) -> Self {
        Self {
            service: ServiceSettings::default(),
            probe: RetryPolicy::new(5, Duration::from_millis(1000)),
            identity: RetryPolicy::new(5, Duration::from_millis(1000)),
            resume: RetryPolicy::new(3, Duration::ZERO),
            turnaround_timeout: Duration::from_secs(1),
            outcome_timeout: Some(Duration::from_secs(30)),
            message_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(1),
            state_dir,
        }
    }
}
