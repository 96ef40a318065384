use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use cardrelay_core::{is_restricted_url, ReceiverId};
use relay_logging::{relay_error, relay_info};

use crate::agent::{spawn_agent, AgentHandle, Presenter};
use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::generation::GenerationService;
use crate::tracker::ChannelStatusSubscriber;
use crate::transport::LocalHub;
use crate::{CardRequest, EngineEvent, RequestId};

enum EngineCommand {
    OpenTab {
        receiver: ReceiverId,
        url: String,
        presenter: Arc<dyn Presenter>,
        visible: bool,
    },
    SetVisibility {
        receiver: ReceiverId,
        visible: bool,
    },
    CloseTab {
        receiver: ReceiverId,
    },
    GenerateCard {
        request_id: RequestId,
        receiver: ReceiverId,
        request: CardRequest,
    },
    TakeLastResult,
}

/// Trigger-surface facade. Owns a background thread that runs the
/// coordinator, the hub and every tab's agent on one tokio runtime.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: mpsc::Receiver<EngineEvent>,
    next_request: AtomicU64,
}

impl EngineHandle {
    pub fn new(config: EngineConfig, service: Arc<dyn GenerationService>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        thread::spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(err) => {
                    relay_error!("could not start engine runtime: {}", err);
                    return;
                }
            };
            let _entered = runtime.enter();

            let (hub, runtime_rx) = LocalHub::new(config.turnaround_timeout);
            let identity = config.identity;
            let coordinator = Arc::new(Coordinator::new(config, hub.clone(), service));
            coordinator.subscribe(Arc::new(ChannelStatusSubscriber::new(event_tx.clone())));
            runtime.spawn(Arc::clone(&coordinator).run(runtime_rx));

            let mut tabs: HashMap<ReceiverId, AgentHandle> = HashMap::new();
            while let Ok(command) = cmd_rx.recv() {
                match command {
                    EngineCommand::OpenTab {
                        receiver,
                        url,
                        presenter,
                        visible,
                    } => {
                        if let Some(previous) = tabs.remove(&receiver) {
                            previous.unload();
                        }
                        coordinator.open_receiver(receiver, &url);
                        // Internal pages never get an agent injected.
                        if is_restricted_url(&url) {
                            relay_info!("tab {} shows {}, no agent injected", receiver, url);
                            continue;
                        }
                        let agent = spawn_agent(hub.link(receiver), presenter, identity, visible);
                        tabs.insert(receiver, agent);
                    }
                    EngineCommand::SetVisibility { receiver, visible } => {
                        if let Some(agent) = tabs.get(&receiver) {
                            agent.set_visible(visible);
                        }
                    }
                    EngineCommand::CloseTab { receiver } => {
                        if let Some(agent) = tabs.remove(&receiver) {
                            agent.unload();
                        } else {
                            coordinator.tear_down(receiver);
                        }
                    }
                    EngineCommand::GenerateCard {
                        request_id,
                        receiver,
                        request,
                    } => {
                        let coordinator = Arc::clone(&coordinator);
                        let event_tx = event_tx.clone();
                        runtime.spawn(async move {
                            let event = match coordinator.generate_card(receiver, request).await {
                                Ok(delivery) => EngineEvent::CardAccepted {
                                    request_id,
                                    receiver,
                                    message_id: delivery.message_id,
                                    image_ref: delivery.image_ref,
                                },
                                Err(error) => EngineEvent::CardFailed { request_id, error },
                            };
                            let _ = event_tx.send(event);
                        });
                    }
                    EngineCommand::TakeLastResult => {
                        let _ = event_tx.send(EngineEvent::LastResult(coordinator.take_last_result()));
                    }
                }
            }

            for agent in tabs.into_values() {
                agent.unload();
            }
        });

        Self {
            cmd_tx,
            event_rx,
            next_request: AtomicU64::new(1),
        }
    }

    pub fn open_tab(
        &self,
        receiver: ReceiverId,
        url: impl Into<String>,
        presenter: Arc<dyn Presenter>,
        visible: bool,
    ) {
        let _ = self.cmd_tx.send(EngineCommand::OpenTab {
            receiver,
            url: url.into(),
            presenter,
            visible,
        });
    }

    pub fn set_visibility(&self, receiver: ReceiverId, visible: bool) {
        let _ = self
            .cmd_tx
            .send(EngineCommand::SetVisibility { receiver, visible });
    }

    pub fn close_tab(&self, receiver: ReceiverId) {
        let _ = self.cmd_tx.send(EngineCommand::CloseTab { receiver });
    }

    pub fn generate_card(&self, receiver: ReceiverId, request: CardRequest) -> RequestId {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let _ = self.cmd_tx.send(EngineCommand::GenerateCard {
            request_id,
            receiver,
            request,
        });
        request_id
    }

    /// The answer arrives as [`EngineEvent::LastResult`].
    pub fn take_last_result(&self) {
        let _ = self.cmd_tx.send(EngineCommand::TakeLastResult);
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }
}
