use std::sync::Arc;

use cardrelay_core::{
    is_restricted_url, MessageId, Payload, PreviewOutcome, ReceiverId, Reply,
};
use relay_logging::{clip, relay_debug, relay_error, relay_info, relay_warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::EngineConfig;
use crate::generation::GenerationService;
use crate::persist::{LastResult, LastResultSlot};
use crate::prober::{unix_millis, Prober};
use crate::registry::ReceiverRegistry;
use crate::tracker::{FailureReason, Resubmission, StatusSubscriber, StatusTracker};
use crate::transport::{Envelope, RuntimeEvent, Transport};
use crate::{Ack, CardRequest, DeliveryError, FailureKind, GenerationError};

/// A generated card that the receiver has accepted for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDelivery {
    pub message_id: MessageId,
    pub image_ref: String,
}

/// Mediates between trigger surfaces, page agents and the generation
/// service. Owns the receiver handles and the in-flight message table.
pub struct Coordinator {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    service: Arc<dyn GenerationService>,
    registry: Arc<ReceiverRegistry>,
    tracker: Arc<StatusTracker>,
    prober: Prober,
    last_result: LastResultSlot,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        service: Arc<dyn GenerationService>,
    ) -> Self {
        let registry = Arc::new(ReceiverRegistry::new());
        let tracker = Arc::new(StatusTracker::new(Arc::clone(&registry), config.resume));
        let prober = Prober::new(Arc::clone(&transport), Arc::clone(&registry));
        let last_result = LastResultSlot::new(config.state_dir.clone());
        Self {
            config,
            transport,
            service,
            registry,
            tracker,
            prober,
            last_result,
        }
    }

    pub fn registry(&self) -> &ReceiverRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn subscribe(&self, subscriber: Arc<dyn StatusSubscriber>) {
        self.tracker.subscribe(subscriber);
    }

    /// A trigger surface addressed this context for the given page.
    pub fn open_receiver(&self, receiver: ReceiverId, url: &str) {
        self.registry.resolve(receiver, Some(url));
    }

    /// Sends a command once the receiver is ready. Returns after the
    /// receiver acknowledged receipt; the outcome is reported later through
    /// status notifications.
    pub async fn deliver(&self, receiver: ReceiverId, payload: Payload) -> Result<Ack, DeliveryError> {
        let lifecycle = self.registry.resolve(receiver, None);
        if !lifecycle.is_initialized() && !self.prober.probe(receiver, &self.config.probe).await {
            return Err(DeliveryError::Unreachable(receiver));
        }
        // The probe suspended us; the receiver may have gone in the meantime.
        if !self.registry.is_initialized(receiver) {
            return Err(DeliveryError::Unreachable(receiver));
        }

        let (message_id, command) = self.tracker.register(receiver, payload);
        let reply = self.transport.send(receiver, command).await;
        match reply {
            Err(err) => {
                self.tracker
                    .fail(message_id, FailureReason::Transport(err.to_string()));
                Err(DeliveryError::TransportFailed(err.to_string()))
            }
            Ok(Reply::Rejected { reason, .. }) => {
                self.tracker
                    .fail(message_id, FailureReason::Rejected(reason.clone()));
                Err(DeliveryError::RejectedByReceiver(reason))
            }
            Ok(_) => {
                if self.tracker.record_ack(message_id) {
                    return Ok(Ack { message_id });
                }
                // Torn down between send and reply.
                self.tracker.fail(message_id, FailureReason::TornDown);
                Err(DeliveryError::Unreachable(receiver))
            }
        }
    }

    /// Full trigger flow: generate a card for `request` and show it in
    /// `receiver`.
    ///
    /// The card is generated before the receiver is probed, so a service
    /// that is down or answers with an error (e.g. HTTP 500) never causes the
    /// receiver to be contacted. A generated card is saved to the last-result
    /// slot before delivery, which leaves it for pickup even when the
    /// receiver turns out to be unreachable.
    pub async fn generate_card(
        &self,
        receiver: ReceiverId,
        request: CardRequest,
    ) -> Result<CardDelivery, DeliveryError> {
        if request.text.trim().is_empty() {
            return Err(DeliveryError::UpstreamFailed(GenerationError::new(
                FailureKind::EmptyText,
                "no text selected",
            )));
        }
        self.registry.resolve(receiver, Some(&request.url));
        if is_restricted_url(&request.url) {
            relay_warn!("receiver {} hosts a restricted page {}", receiver, request.url);
            return Err(DeliveryError::Unreachable(receiver));
        }

        if !self.service.status().await {
            relay_warn!("generation service at {} is down", self.config.service.base_url);
            return Err(DeliveryError::UpstreamFailed(GenerationError::new(
                FailureKind::ServiceUnavailable,
                "server not running or unreachable",
            )));
        }

        relay_info!(
            "generating card for receiver {} ({} chars)",
            receiver,
            request.text.chars().count()
        );
        let image = self
            .service
            .generate(&request.text, &request.url, &request.title)
            .await
            .map_err(|err| {
                relay_warn!("generation for receiver {} failed: {}", receiver, err);
                DeliveryError::UpstreamFailed(err)
            })?;
        let image_ref = image.into_image_ref();
        relay_debug!("card ready: {}", clip(&image_ref, 48));

        let saved = LastResult {
            image_ref: image_ref.clone(),
            text: request.text,
            url: request.url,
            saved_at_ms: unix_millis(),
        };
        if let Err(err) = self.last_result.save(&saved) {
            relay_warn!("could not persist last result: {}", err);
        }

        let ack = self
            .deliver(
                receiver,
                Payload::ShowPreview {
                    image_ref: image_ref.clone(),
                },
            )
            .await?;
        Ok(CardDelivery {
            message_id: ack.message_id,
            image_ref,
        })
    }

    /// Consumes the persisted last result, if any.
    pub fn take_last_result(&self) -> Option<LastResult> {
        match self.last_result.take() {
            Ok(result) => result,
            Err(err) => {
                relay_warn!("could not read last result: {}", err);
                None
            }
        }
    }

    /// Discards the receiver and fails everything still addressed to it.
    pub fn tear_down(&self, receiver: ReceiverId) {
        if self.registry.tear_down(receiver).is_some() {
            relay_info!("receiver {} torn down", receiver);
        }
        self.tracker
            .fail_all_for(receiver, FailureReason::TornDown);
    }

    /// Lifecycle events from an agent that has since been replaced in the
    /// same tab are dropped; the replacement owns the handle now.
    pub async fn handle_runtime_event(&self, envelope: Envelope) {
        let Envelope {
            sender,
            instance,
            event,
        } = envelope;
        if event.changes_lifecycle() && !self.registry.claim(sender, instance) {
            relay_debug!(
                "dropping lifecycle event from replaced agent {} of receiver {}",
                instance,
                sender
            );
            return;
        }
        match event {
            RuntimeEvent::IdentityQuery { reply } => {
                let _ = reply.send(sender);
            }
            RuntimeEvent::Initialized { visible } => {
                self.registry.resolve(sender, None);
                self.registry.claim(sender, instance);
                self.registry.mark_ready(sender, Some(visible));
            }
            RuntimeEvent::VisibilityChanged { visible } => {
                self.registry.set_visibility(sender, visible);
                let resubmissions = self
                    .tracker
                    .on_receiver_visibility_changed(sender, visible);
                self.resubmit(resubmissions).await;
            }
            RuntimeEvent::PreviewShown { message_id } => {
                self.tracker
                    .record_outcome(sender, message_id, PreviewOutcome::Shown);
            }
            RuntimeEvent::PreviewFailed { message_id, error } => {
                self.tracker
                    .record_outcome(sender, message_id, PreviewOutcome::Failed { error });
            }
            RuntimeEvent::InitFailed { reason } => {
                relay_error!("receiver {} failed to initialize: {}", sender, reason);
                self.tear_down(sender);
                self.tracker.publish_receiver_failure(
                    sender,
                    &DeliveryError::InitializationFailed {
                        receiver: sender,
                        reason,
                    },
                );
            }
            RuntimeEvent::Unloaded => self.tear_down(sender),
        }
    }

    /// Applies the outcome deadline and collects old terminal messages.
    pub fn sweep(&self) {
        let now = Instant::now();
        if let Some(timeout) = self.config.outcome_timeout {
            self.tracker.expire_overdue(now, timeout);
        }
        let collected = self.tracker.collect_garbage(now, self.config.message_ttl);
        if collected > 0 {
            relay_debug!("collected {} finished messages", collected);
        }
    }

    /// Event loop: runtime events plus the periodic sweep. Ends when every
    /// agent link and the hub are gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<Envelope>) {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                envelope = events.recv() => match envelope {
                    Some(envelope) => self.handle_runtime_event(envelope).await,
                    None => break,
                },
                _ = sweep.tick() => self.sweep(),
            }
        }
    }

    async fn resubmit(&self, resubmissions: Vec<Resubmission>) {
        for resubmission in resubmissions {
            let Resubmission {
                message_id,
                receiver,
                command,
            } = resubmission;
            relay_info!("resubmitting message {} to receiver {}", message_id, receiver);
            match self.transport.send(receiver, command).await {
                Ok(Reply::Rejected { reason, .. }) => {
                    self.tracker
                        .fail(message_id, FailureReason::Rejected(reason));
                }
                Ok(_) => {}
                // A no-op if a tear-down already failed the message.
                Err(err) => {
                    self.tracker
                        .fail(message_id, FailureReason::Transport(err.to_string()));
                }
            }
        }
    }
}
