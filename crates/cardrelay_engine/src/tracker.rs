use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use cardrelay_core::{
    Command, MessageId, MessageStatus, Payload, PreviewOutcome, ReceiverId, ReceiverLifecycle,
};
use relay_logging::{relay_debug, relay_warn};
use tokio::time::Instant;

use crate::registry::ReceiverRegistry;
use crate::retry::RetryPolicy;
use crate::types::{DeliveryError, EngineEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Transport(String),
    Rejected(String),
    /// Interrupted more often than the resume ceiling allows.
    Abandoned,
    TornDown,
    OutcomeTimeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(err) => write!(f, "transport failed: {err}"),
            FailureReason::Rejected(reason) => write!(f, "rejected: {reason}"),
            FailureReason::Abandoned => write!(f, "abandoned after repeated interruptions"),
            FailureReason::TornDown => write!(f, "receiver torn down"),
            FailureReason::OutcomeTimeout => write!(f, "no outcome reported in time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: MessageId,
    pub receiver: ReceiverId,
    pub from: MessageStatus,
    pub to: MessageStatus,
    pub reason: Option<FailureReason>,
}

impl StatusChange {
    /// Caller-facing error for a change into `failed`.
    pub fn delivery_error(&self) -> Option<DeliveryError> {
        let reason = self.reason.as_ref()?;
        Some(match reason {
            FailureReason::Abandoned => DeliveryError::Abandoned(self.message_id),
            FailureReason::Rejected(reason) => DeliveryError::RejectedByReceiver(reason.clone()),
            FailureReason::TornDown => DeliveryError::Unreachable(self.receiver),
            FailureReason::Transport(_) | FailureReason::OutcomeTimeout => {
                DeliveryError::TransportFailed(reason.to_string())
            }
        })
    }
}

/// Observer of message status changes. Subscribers are called in
/// registration order, outside of any tracker lock.
pub trait StatusSubscriber: Send + Sync {
    fn on_status_change(&self, change: &StatusChange);

    fn on_receiver_failed(&self, _receiver: ReceiverId, _error: &DeliveryError) {}
}

/// Forwards notifications into the engine event channel.
pub struct ChannelStatusSubscriber {
    tx: mpsc::Sender<EngineEvent>,
}

impl ChannelStatusSubscriber {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }
}

impl StatusSubscriber for ChannelStatusSubscriber {
    fn on_status_change(&self, change: &StatusChange) {
        let _ = self.tx.send(EngineEvent::Status(change.clone()));
    }

    fn on_receiver_failed(&self, receiver: ReceiverId, error: &DeliveryError) {
        let _ = self.tx.send(EngineEvent::ReceiverFailed {
            receiver,
            error: error.clone(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedMessage {
    pub id: MessageId,
    pub receiver: ReceiverId,
    pub payload: Payload,
    pub status: MessageStatus,
    pub created_at: Instant,
    pub updated_at: Instant,
    /// Times the message was resubmitted after an interruption.
    pub resume_count: u32,
    pub last_error: Option<FailureReason>,
}

/// A resumed message that has to be sent again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resubmission {
    pub message_id: MessageId,
    pub receiver: ReceiverId,
    pub command: Command,
}

/// In-flight message table. Ids come from a process-wide counter and are
/// never reused, even after collection.
pub struct StatusTracker {
    messages: Mutex<BTreeMap<MessageId, TrackedMessage>>,
    next_id: AtomicU64,
    registry: Arc<ReceiverRegistry>,
    resume: RetryPolicy,
    subscribers: RwLock<Vec<Arc<dyn StatusSubscriber>>>,
}

impl StatusTracker {
    pub fn new(registry: Arc<ReceiverRegistry>, resume: RetryPolicy) -> Self {
        Self {
            messages: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            registry,
            resume,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn StatusSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    /// Creates a `pending` message and the command that carries its id.
    pub fn register(&self, receiver: ReceiverId, payload: Payload) -> (MessageId, Command) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let command = payload.clone().into_command(id);
        self.lock().insert(
            id,
            TrackedMessage {
                id,
                receiver,
                payload,
                status: MessageStatus::Pending,
                created_at: now,
                updated_at: now,
                resume_count: 0,
                last_error: None,
            },
        );
        relay_debug!("message {} registered for receiver {}", id, receiver);
        (id, command)
    }

    pub fn get(&self, id: MessageId) -> Option<TrackedMessage> {
        self.lock().get(&id).cloned()
    }

    pub fn status(&self, id: MessageId) -> Option<MessageStatus> {
        self.lock().get(&id).map(|message| message.status)
    }

    /// Non-terminal messages addressed to `receiver`, oldest first.
    pub fn outstanding_for(&self, receiver: ReceiverId) -> Vec<MessageId> {
        self.lock()
            .values()
            .filter(|message| message.receiver == receiver && !message.status.is_terminal())
            .map(|message| message.id)
            .collect()
    }

    /// The receiver answered the command. Returns whether the message is
    /// past `pending` afterwards.
    ///
    /// A receiver that was hidden while the command was in flight never saw
    /// the interruption, so the message is interrupted right away and waits
    /// for the next show.
    pub fn record_ack(&self, id: MessageId) -> bool {
        let mut changes = Vec::new();
        let acknowledged = {
            let mut messages = self.lock();
            match messages.get_mut(&id) {
                None => false,
                Some(message) => match message.status {
                    MessageStatus::Pending => {
                        self.acknowledge(message, &mut changes);
                        if message.status == MessageStatus::Processing
                            && self.registry.lifecycle(message.receiver)
                                == Some(ReceiverLifecycle::Hidden)
                        {
                            transition(message, MessageStatus::Interrupted, None, &mut changes);
                        }
                        message.status != MessageStatus::Pending
                    }
                    MessageStatus::Failed => false,
                    MessageStatus::Processing
                    | MessageStatus::Interrupted
                    | MessageStatus::Completed => true,
                },
            }
        };
        self.publish(&changes);
        acknowledged
    }

    /// Outcome report from `sender`. Unknown ids, foreign senders and
    /// messages that are already terminal are ignored.
    pub fn record_outcome(&self, sender: ReceiverId, id: MessageId, outcome: PreviewOutcome) {
        let mut changes = Vec::new();
        {
            let mut messages = self.lock();
            let Some(message) = messages.get_mut(&id) else {
                relay_debug!("outcome for unknown message {} ignored", id);
                return;
            };
            if message.receiver != sender {
                relay_warn!(
                    "receiver {} reported on message {} owned by {}",
                    sender,
                    id,
                    message.receiver
                );
                return;
            }
            match message.status {
                MessageStatus::Completed | MessageStatus::Failed => return,
                // The outcome overtook the acknowledgement.
                MessageStatus::Pending => self.acknowledge(message, &mut changes),
                // The work finished even though the page was backgrounded.
                MessageStatus::Interrupted => {
                    transition(message, MessageStatus::Processing, None, &mut changes)
                }
                MessageStatus::Processing => {}
            }
            if message.status == MessageStatus::Processing {
                match outcome {
                    PreviewOutcome::Shown => {
                        transition(message, MessageStatus::Completed, None, &mut changes)
                    }
                    PreviewOutcome::Failed { error } => transition(
                        message,
                        MessageStatus::Failed,
                        Some(FailureReason::Rejected(error)),
                        &mut changes,
                    ),
                }
            }
        }
        self.publish(&changes);
    }

    /// Forces a non-terminal message into `failed`.
    pub fn fail(&self, id: MessageId, reason: FailureReason) {
        let mut changes = Vec::new();
        if let Some(message) = self.lock().get_mut(&id) {
            if !message.status.is_terminal() {
                transition(message, MessageStatus::Failed, Some(reason), &mut changes);
            }
        }
        self.publish(&changes);
    }

    /// Fails everything still outstanding for a receiver that went away.
    pub fn fail_all_for(&self, receiver: ReceiverId, reason: FailureReason) {
        let mut changes = Vec::new();
        for message in self.lock().values_mut() {
            if message.receiver == receiver && !message.status.is_terminal() {
                transition(
                    message,
                    MessageStatus::Failed,
                    Some(reason.clone()),
                    &mut changes,
                );
            }
        }
        self.publish(&changes);
    }

    /// Hidden: processing messages are interrupted. Visible: interrupted
    /// messages are resumed and returned for resending, unless they ran out
    /// of resumes, in which case they fail as abandoned.
    pub fn on_receiver_visibility_changed(
        &self,
        receiver: ReceiverId,
        visible: bool,
    ) -> Vec<Resubmission> {
        let mut changes = Vec::new();
        let mut resubmissions = Vec::new();
        for message in self.lock().values_mut() {
            if message.receiver != receiver {
                continue;
            }
            match (visible, message.status) {
                (false, MessageStatus::Processing) => {
                    transition(message, MessageStatus::Interrupted, None, &mut changes)
                }
                (true, MessageStatus::Interrupted) => {
                    if self.resume.allows(message.resume_count + 1) {
                        message.resume_count += 1;
                        transition(message, MessageStatus::Processing, None, &mut changes);
                        resubmissions.push(Resubmission {
                            message_id: message.id,
                            receiver,
                            command: message.payload.clone().into_command(message.id),
                        });
                    } else {
                        relay_warn!(
                            "message {} abandoned after {} resumes",
                            message.id,
                            message.resume_count
                        );
                        transition(
                            message,
                            MessageStatus::Failed,
                            Some(FailureReason::Abandoned),
                            &mut changes,
                        );
                    }
                }
                _ => {}
            }
        }
        self.publish(&changes);
        resubmissions
    }

    /// Fails processing messages whose outcome is overdue.
    pub fn expire_overdue(&self, now: Instant, timeout: Duration) -> usize {
        let mut changes = Vec::new();
        for message in self.lock().values_mut() {
            if message.status == MessageStatus::Processing && message.updated_at + timeout <= now {
                relay_warn!("message {} timed out waiting for its outcome", message.id);
                transition(
                    message,
                    MessageStatus::Failed,
                    Some(FailureReason::OutcomeTimeout),
                    &mut changes,
                );
            }
        }
        self.publish(&changes);
        changes.len()
    }

    /// Drops terminal messages older than `ttl`. Returns how many went.
    pub fn collect_garbage(&self, now: Instant, ttl: Duration) -> usize {
        let mut messages = self.lock();
        let before = messages.len();
        messages.retain(|_, message| !(message.status.is_terminal() && message.updated_at + ttl <= now));
        before - messages.len()
    }

    pub fn publish_receiver_failure(&self, receiver: ReceiverId, error: &DeliveryError) {
        for subscriber in self.subscribers_snapshot() {
            subscriber.on_receiver_failed(receiver, error);
        }
    }

    fn acknowledge(&self, message: &mut TrackedMessage, changes: &mut Vec<StatusChange>) {
        if self.registry.is_initialized(message.receiver) {
            transition(message, MessageStatus::Processing, None, changes);
        } else {
            relay_warn!(
                "message {} acknowledged by uninitialized receiver {}",
                message.id,
                message.receiver
            );
        }
    }

    fn publish(&self, changes: &[StatusChange]) {
        if changes.is_empty() {
            return;
        }
        let subscribers = self.subscribers_snapshot();
        for change in changes {
            for subscriber in &subscribers {
                subscriber.on_status_change(change);
            }
        }
    }

    fn subscribers_snapshot(&self) -> Vec<Arc<dyn StatusSubscriber>> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<MessageId, TrackedMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn transition(
    message: &mut TrackedMessage,
    to: MessageStatus,
    reason: Option<FailureReason>,
    changes: &mut Vec<StatusChange>,
) {
    let from = message.status;
    if !from.can_transition_to(to) {
        relay_warn!("message {} refused status edge {} -> {}", message.id, from, to);
        return;
    }
    relay_debug!("message {} {} -> {}", message.id, from, to);
    message.status = to;
    message.updated_at = Instant::now();
    if reason.is_some() {
        message.last_error = reason.clone();
    }
    changes.push(StatusChange {
        message_id: message.id,
        receiver: message.receiver,
        from,
        to,
        reason,
    });
}
