//! Fire-and-forget message passing between the coordinator and page agents.
//!
//! A send to a receiver that is not listening is dropped by the platform; the
//! sender only learns about it because no reply ever comes back.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cardrelay_core::{Command, MessageId, ReceiverId, Reply};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const INBOX_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("no listener for receiver {0}")]
    NoReceiver(ReceiverId),
    #[error("receiver {0} dropped the message without answering")]
    NoReply(ReceiverId),
    #[error("receiver {0} did not answer in time")]
    TurnaroundTimeout(ReceiverId),
    #[error("coordinator runtime is closed")]
    Closed,
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, receiver: ReceiverId, command: Command) -> Result<Reply, TransportError>;
}

/// A command delivered to an agent together with its reply handle.
#[derive(Debug)]
pub struct Inbound {
    pub command: Command,
    reply: oneshot::Sender<Reply>,
}

impl Inbound {
    pub fn new(command: Command) -> (Self, oneshot::Receiver<Reply>) {
        let (reply, reply_rx) = oneshot::channel();
        (Self { command, reply }, reply_rx)
    }

    pub fn into_parts(self) -> (Command, Responder) {
        (self.command, Responder { reply: self.reply })
    }
}

/// Answers exactly one inbound command. Dropping it unanswered is what a
/// receiver without a handler does.
#[derive(Debug)]
pub struct Responder {
    reply: oneshot::Sender<Reply>,
}

impl Responder {
    pub fn respond(self, reply: Reply) {
        let _ = self.reply.send(reply);
    }
}

/// Events an agent raises towards the coordinator.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// "Who am I": answered with the sender's receiver id.
    IdentityQuery { reply: oneshot::Sender<ReceiverId> },
    Initialized { visible: bool },
    VisibilityChanged { visible: bool },
    PreviewShown { message_id: MessageId },
    PreviewFailed { message_id: MessageId, error: String },
    InitFailed { reason: String },
    Unloaded,
}

impl RuntimeEvent {
    /// Events that move the sender's receiver handle through its lifecycle.
    pub fn changes_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::Initialized { .. }
                | Self::VisibilityChanged { .. }
                | Self::InitFailed { .. }
                | Self::Unloaded
        )
    }
}

/// Identifies one injected agent. Re-injecting into a tab yields a larger id.
pub type AgentInstance = u64;

/// A runtime event stamped with the receiver and agent instance that raised it.
#[derive(Debug)]
pub struct Envelope {
    pub sender: ReceiverId,
    pub instance: AgentInstance,
    pub event: RuntimeEvent,
}

/// In-process stand-in for the browser's extension messaging.
pub struct LocalHub {
    listeners: Mutex<HashMap<ReceiverId, mpsc::Sender<Inbound>>>,
    runtime_tx: mpsc::UnboundedSender<Envelope>,
    turnaround_timeout: Duration,
    next_instance: AtomicU64,
}

impl LocalHub {
    /// Returns the hub and the coordinator end of the runtime channel.
    pub fn new(turnaround_timeout: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<Envelope>) {
        let (runtime_tx, runtime_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            listeners: Mutex::new(HashMap::new()),
            runtime_tx,
            turnaround_timeout,
            next_instance: AtomicU64::new(1),
        });
        (hub, runtime_rx)
    }

    /// Connection for a freshly injected agent in `tab`.
    pub fn link(self: &Arc<Self>, tab: ReceiverId) -> AgentLink {
        AgentLink {
            tab,
            instance: self.next_instance.fetch_add(1, Ordering::Relaxed),
            hub: Arc::clone(self),
        }
    }

    pub fn is_listening(&self, tab: ReceiverId) -> bool {
        self.lock_listeners()
            .get(&tab)
            .is_some_and(|tx| !tx.is_closed())
    }

    fn register(&self, tab: ReceiverId) -> mpsc::Receiver<Inbound> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.lock_listeners().insert(tab, tx);
        rx
    }

    /// Only a dead listener is removed; a re-injected agent may already own the slot.
    fn unregister(&self, tab: ReceiverId) {
        let mut listeners = self.lock_listeners();
        if listeners.get(&tab).is_some_and(|tx| tx.is_closed()) {
            listeners.remove(&tab);
        }
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, HashMap<ReceiverId, mpsc::Sender<Inbound>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Transport for LocalHub {
    async fn send(&self, receiver: ReceiverId, command: Command) -> Result<Reply, TransportError> {
        let listener = self.lock_listeners().get(&receiver).cloned();
        let Some(listener) = listener else {
            return Err(TransportError::NoReceiver(receiver));
        };

        let (inbound, reply_rx) = Inbound::new(command);
        if listener.send(inbound).await.is_err() {
            self.unregister(receiver);
            return Err(TransportError::NoReceiver(receiver));
        }

        match tokio::time::timeout(self.turnaround_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::NoReply(receiver)),
            Err(_) => Err(TransportError::TurnaroundTimeout(receiver)),
        }
    }
}

/// The agent's end of the hub. Everything it reports carries its tab id
/// and instance.
#[derive(Clone)]
pub struct AgentLink {
    tab: ReceiverId,
    instance: AgentInstance,
    hub: Arc<LocalHub>,
}

impl AgentLink {
    pub fn tab(&self) -> ReceiverId {
        self.tab
    }

    pub fn instance(&self) -> AgentInstance {
        self.instance
    }

    /// Starts accepting commands. Until this is called sends are dropped.
    pub fn listen(&self) -> mpsc::Receiver<Inbound> {
        self.hub.register(self.tab)
    }

    /// Call after dropping the receiver returned by [`AgentLink::listen`].
    pub fn close(&self) {
        self.hub.unregister(self.tab);
    }

    pub fn is_runtime_addressable(&self) -> bool {
        !self.hub.runtime_tx.is_closed()
    }

    pub fn report(&self, event: RuntimeEvent) -> Result<(), TransportError> {
        self.hub
            .runtime_tx
            .send(Envelope {
                sender: self.tab,
                instance: self.instance,
                event,
            })
            .map_err(|_| TransportError::Closed)
    }

    /// One identity round trip; retries are the caller's business.
    pub async fn query_identity(&self) -> Result<ReceiverId, TransportError> {
        let (reply, reply_rx) = oneshot::channel();
        self.report(RuntimeEvent::IdentityQuery { reply })?;
        match tokio::time::timeout(self.hub.turnaround_timeout, reply_rx).await {
            Ok(Ok(receiver)) => Ok(receiver),
            Ok(Err(_)) => Err(TransportError::NoReply(self.tab)),
            Err(_) => Err(TransportError::TurnaroundTimeout(self.tab)),
        }
    }
}
