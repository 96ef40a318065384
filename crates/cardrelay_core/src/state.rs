use std::collections::BTreeSet;

use crate::{MessageId, ReceiverId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentPhase {
    /// Loaded but not yet attached to the runtime.
    #[default]
    Unknown,
    /// Acquiring identity and announcing itself.
    Initializing,
    Ready,
    /// Initialization gave up; only pings are still answered.
    Failed,
    TornDown,
}

/// Receiver-side dispatcher state. Mutated only through [`crate::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentState {
    phase: AgentPhase,
    identity: Option<ReceiverId>,
    visible: bool,
    presenting: BTreeSet<MessageId>,
}

impl AgentState {
    pub fn new(visible: bool) -> Self {
        Self {
            phase: AgentPhase::Unknown,
            identity: None,
            visible,
            presenting: BTreeSet::new(),
        }
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn identity(&self) -> Option<ReceiverId> {
        self.identity
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// What a `ping` reports. False while initializing and while hidden.
    pub fn accepts_work(&self) -> bool {
        self.phase == AgentPhase::Ready && self.visible
    }

    pub fn presenting(&self) -> impl Iterator<Item = MessageId> + '_ {
        self.presenting.iter().copied()
    }

    pub(crate) fn set_phase(&mut self, phase: AgentPhase) {
        self.phase = phase;
    }

    pub(crate) fn set_identity(&mut self, receiver: ReceiverId) {
        self.identity = Some(receiver);
    }

    /// Returns false when nothing changed.
    pub(crate) fn set_visible(&mut self, visible: bool) -> bool {
        let changed = self.visible != visible;
        self.visible = visible;
        changed
    }

    /// Returns false if the message is already being presented.
    pub(crate) fn begin_presenting(&mut self, message_id: MessageId) -> bool {
        self.presenting.insert(message_id)
    }

    pub(crate) fn finish_presenting(&mut self, message_id: MessageId) -> bool {
        self.presenting.remove(&message_id)
    }

    pub(crate) fn clear_presenting(&mut self) {
        self.presenting.clear();
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new(true)
    }
}
