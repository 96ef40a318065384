use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cardrelay_core::{is_restricted_url, Command, ReceiverId, ReceiverLifecycle, Reply};
use relay_logging::{relay_debug, relay_warn};

use crate::registry::ReceiverRegistry;
use crate::retry::RetryPolicy;
use crate::transport::Transport;

/// Decides whether a receiver can take commands right now.
///
/// Absence of readiness is an expected answer, so probing reports a plain
/// boolean and never fails.
pub struct Prober {
    transport: Arc<dyn Transport>,
    registry: Arc<ReceiverRegistry>,
}

enum Attempt {
    Ready,
    /// The handle went away while we were waiting.
    Abort,
}

impl Prober {
    pub fn new(transport: Arc<dyn Transport>, registry: Arc<ReceiverRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    pub async fn probe(&self, receiver: ReceiverId, policy: &RetryPolicy) -> bool {
        if let Some(url) = self.registry.url(receiver) {
            if is_restricted_url(&url) {
                relay_debug!("receiver {} hosts restricted page {}, not probing", receiver, url);
                return false;
            }
        }

        let lifecycle = self.registry.resolve(receiver, None);
        if lifecycle.is_initialized() {
            return true;
        }
        self.registry.transition(receiver, ReceiverLifecycle::Probing);

        let outcome = policy
            .run("probe", |attempt| async move {
                // Lifecycle may have moved while the previous attempt was suspended.
                match self.registry.lifecycle(receiver) {
                    None => return Some(Attempt::Abort),
                    Some(lifecycle) if lifecycle.is_initialized() => return Some(Attempt::Ready),
                    Some(_) => {}
                }
                let timestamp = unix_millis();
                match self.transport.send(receiver, Command::Ping { timestamp }).await {
                    Ok(Reply::Pong { ready: true, .. }) => Some(Attempt::Ready),
                    Ok(reply) => {
                        relay_debug!("probe {} attempt {}: {:?}", receiver, attempt, reply);
                        None
                    }
                    Err(err) => {
                        relay_debug!("probe {} attempt {}: {}", receiver, attempt, err);
                        None
                    }
                }
            })
            .await;

        match outcome {
            Some(Attempt::Ready) => self.registry.mark_ready(receiver, None),
            Some(Attempt::Abort) => false,
            None => {
                relay_warn!(
                    "receiver {} not ready after {} attempts",
                    receiver,
                    policy.max_attempts
                );
                if self.registry.lifecycle(receiver) == Some(ReceiverLifecycle::Probing) {
                    self.registry.transition(receiver, ReceiverLifecycle::Unknown);
                }
                false
            }
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
