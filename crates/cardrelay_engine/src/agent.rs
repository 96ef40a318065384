//! Receiver-side runtime: feeds transport traffic and page signals into the
//! pure dispatcher and carries out the effects it asks for.
use std::sync::Arc;

use cardrelay_core::{update, AgentPhase, AgentState, Effect, Msg, PreviewOutcome};
use relay_logging::{relay_debug, relay_error, relay_info, relay_warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::retry::RetryPolicy;
use crate::transport::{AgentLink, Inbound, Responder, RuntimeEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("preview failed: {0}")]
pub struct PreviewError(pub String);

/// Puts a generated card on screen.
#[async_trait::async_trait]
pub trait Presenter: Send + Sync {
    async fn show_preview(&self, image_ref: &str) -> Result<(), PreviewError>;
}

enum Control {
    Visibility(bool),
    Unload,
}

/// Owner-side handle for a running agent.
pub struct AgentHandle {
    control_tx: mpsc::UnboundedSender<Control>,
    phase_rx: watch::Receiver<AgentPhase>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Page visibility signal.
    pub fn set_visible(&self, visible: bool) {
        let _ = self.control_tx.send(Control::Visibility(visible));
    }

    /// Navigation or tab close.
    pub fn unload(&self) {
        let _ = self.control_tx.send(Control::Unload);
    }

    pub fn phase(&self) -> AgentPhase {
        *self.phase_rx.borrow()
    }

    /// Waits until initialization has either succeeded or given up.
    pub async fn settled(&mut self) -> AgentPhase {
        let settled = self
            .phase_rx
            .wait_for(|phase| !matches!(phase, AgentPhase::Unknown | AgentPhase::Initializing))
            .await;
        match settled {
            Ok(phase) => *phase,
            Err(_) => AgentPhase::TornDown,
        }
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Injects an agent behind `link`. It starts listening before the handshake
/// so that pings during initialization get a truthful `ready: false`.
pub fn spawn_agent(
    link: AgentLink,
    presenter: Arc<dyn Presenter>,
    identity: RetryPolicy,
    visible: bool,
) -> AgentHandle {
    let inbound = link.listen();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (phase_tx, phase_rx) = watch::channel(AgentPhase::Unknown);

    let runtime = AgentRuntime {
        link,
        presenter,
        identity,
        internal_tx,
        phase_tx,
    };
    let task = tokio::spawn(runtime.run(AgentState::new(visible), inbound, internal_rx, control_rx));

    AgentHandle {
        control_tx,
        phase_rx,
        task,
    }
}

struct AgentRuntime {
    link: AgentLink,
    presenter: Arc<dyn Presenter>,
    identity: RetryPolicy,
    internal_tx: mpsc::UnboundedSender<Msg>,
    phase_tx: watch::Sender<AgentPhase>,
}

impl AgentRuntime {
    async fn run(
        self,
        state: AgentState,
        mut inbound: mpsc::Receiver<Inbound>,
        mut internal_rx: mpsc::UnboundedReceiver<Msg>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        let runtime_addressable = self.link.is_runtime_addressable();
        let mut state = self.step(state, Msg::Loaded { runtime_addressable }, None);

        loop {
            tokio::select! {
                Some(message) = inbound.recv() => {
                    let (command, responder) = message.into_parts();
                    state = self.step(state, Msg::Command(command), Some(responder));
                }
                Some(msg) = internal_rx.recv() => {
                    state = self.step(state, msg, None);
                }
                control = control_rx.recv() => match control {
                    Some(Control::Visibility(visible)) => {
                        state = self.step(state, Msg::VisibilityChanged { visible }, None);
                    }
                    Some(Control::Unload) | None => {
                        self.step(state, Msg::Unloaded, None);
                        break;
                    }
                },
            }
        }
        drop(inbound);
        self.link.close();
        relay_debug!("agent for tab {} stopped", self.link.tab());
    }

    fn step(&self, state: AgentState, msg: Msg, responder: Option<Responder>) -> AgentState {
        let (state, effects) = update(state, msg);
        self.phase_tx.send_replace(state.phase());
        let mut responder = responder;
        for effect in effects {
            self.execute(effect, &mut responder);
        }
        if responder.is_some() {
            relay_warn!("tab {} left a command unanswered", self.link.tab());
        }
        state
    }

    fn execute(&self, effect: Effect, responder: &mut Option<Responder>) {
        match effect {
            Effect::Reply(reply) => {
                if let Some(responder) = responder.take() {
                    responder.respond(reply);
                }
            }
            Effect::AcquireIdentity => {
                let link = self.link.clone();
                let policy = self.identity;
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let resolved = policy
                        .run("identity", |_| {
                            let link = link.clone();
                            async move { link.query_identity().await.ok() }
                        })
                        .await;
                    let msg = match resolved {
                        Some(receiver) => Msg::IdentityResolved { receiver },
                        None => Msg::IdentityExhausted {
                            attempts: policy.max_attempts,
                        },
                    };
                    let _ = internal_tx.send(msg);
                });
            }
            Effect::AnnounceInitialized { receiver, visible } => {
                relay_info!("tab {} initialized as receiver {}", self.link.tab(), receiver);
                let result = self
                    .link
                    .report(RuntimeEvent::Initialized { visible })
                    .map_err(|err| err.to_string());
                let _ = self.internal_tx.send(Msg::AnnounceFinished { result });
            }
            Effect::Present {
                message_id,
                image_ref,
            } => {
                let presenter = Arc::clone(&self.presenter);
                let internal_tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = presenter
                        .show_preview(&image_ref)
                        .await
                        .map_err(|err| err.to_string());
                    let _ = internal_tx.send(Msg::PresentationFinished { message_id, result });
                });
            }
            Effect::ReportOutcome {
                message_id,
                outcome,
            } => {
                let event = match outcome {
                    PreviewOutcome::Shown => RuntimeEvent::PreviewShown { message_id },
                    PreviewOutcome::Failed { error } => {
                        RuntimeEvent::PreviewFailed { message_id, error }
                    }
                };
                self.report(event);
            }
            Effect::ReportVisibility { visible } => {
                self.report(RuntimeEvent::VisibilityChanged { visible });
            }
            Effect::ReportInitFailure { reason } => {
                relay_error!("tab {} failed to initialize: {}", self.link.tab(), reason);
                self.report(RuntimeEvent::InitFailed { reason });
            }
            Effect::ReportUnloaded => self.report(RuntimeEvent::Unloaded),
        }
    }

    fn report(&self, event: RuntimeEvent) {
        if let Err(err) = self.link.report(event) {
            relay_warn!("tab {} could not report to coordinator: {}", self.link.tab(), err);
        }
    }
}
