use crate::{AgentPhase, AgentState, Command, Effect, Msg, PreviewOutcome, Reply};

/// Pure dispatcher step: applies a message to the agent state and returns the
/// effects the runtime has to perform.
pub fn update(mut state: AgentState, msg: Msg) -> (AgentState, Vec<Effect>) {
    let effects = match msg {
        // A ping never depends on the handshake; it reports readiness truthfully.
        Msg::Command(Command::Ping { timestamp }) => vec![Effect::Reply(Reply::Pong {
            ready: state.accepts_work(),
            timestamp,
        })],
        _ if state.phase() == AgentPhase::TornDown => Vec::new(),
        Msg::Loaded {
            runtime_addressable,
        } => {
            if state.phase() != AgentPhase::Unknown {
                return (state, Vec::new());
            }
            if runtime_addressable {
                state.set_phase(AgentPhase::Initializing);
                vec![Effect::AcquireIdentity]
            } else {
                state.set_phase(AgentPhase::Failed);
                vec![Effect::ReportInitFailure {
                    reason: "extension runtime is not addressable".to_string(),
                }]
            }
        }
        Msg::IdentityResolved { receiver } => {
            if state.phase() != AgentPhase::Initializing || state.identity().is_some() {
                return (state, Vec::new());
            }
            state.set_identity(receiver);
            vec![Effect::AnnounceInitialized {
                receiver,
                visible: state.is_visible(),
            }]
        }
        Msg::IdentityExhausted { attempts } => {
            if state.phase() != AgentPhase::Initializing {
                return (state, Vec::new());
            }
            state.set_phase(AgentPhase::Failed);
            vec![Effect::ReportInitFailure {
                reason: format!("identity unavailable after {attempts} attempts"),
            }]
        }
        Msg::AnnounceFinished { result } => {
            if state.phase() != AgentPhase::Initializing {
                return (state, Vec::new());
            }
            match result {
                Ok(()) => {
                    state.set_phase(AgentPhase::Ready);
                    Vec::new()
                }
                Err(reason) => {
                    state.set_phase(AgentPhase::Failed);
                    vec![Effect::ReportInitFailure { reason }]
                }
            }
        }
        Msg::VisibilityChanged { visible } => {
            let changed = state.set_visible(visible);
            if changed && state.phase() == AgentPhase::Ready {
                vec![Effect::ReportVisibility { visible }]
            } else {
                Vec::new()
            }
        }
        Msg::Command(Command::ShowPreview {
            message_id,
            image_ref,
        }) => {
            if state.phase() != AgentPhase::Ready {
                vec![Effect::Reply(Reply::Rejected {
                    message_id: Some(message_id),
                    reason: "receiver not initialized".to_string(),
                })]
            } else if state.begin_presenting(message_id) {
                vec![
                    Effect::Reply(Reply::Accepted { message_id }),
                    Effect::Present {
                        message_id,
                        image_ref,
                    },
                ]
            } else {
                // Redelivery of a preview that is still on screen being loaded.
                vec![Effect::Reply(Reply::Accepted { message_id })]
            }
        }
        Msg::Command(Command::Unsupported { kind }) => vec![Effect::Reply(Reply::Rejected {
            message_id: None,
            reason: format!("unrecognized command: {kind}"),
        })],
        Msg::PresentationFinished { message_id, result } => {
            if !state.finish_presenting(message_id) {
                return (state, Vec::new());
            }
            let outcome = match result {
                Ok(()) => PreviewOutcome::Shown,
                Err(error) => PreviewOutcome::Failed { error },
            };
            vec![Effect::ReportOutcome {
                message_id,
                outcome,
            }]
        }
        Msg::Unloaded => {
            state.set_phase(AgentPhase::TornDown);
            state.clear_presenting();
            vec![Effect::ReportUnloaded]
        }
    };

    (state, effects)
}
