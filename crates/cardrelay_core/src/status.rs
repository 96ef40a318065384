use std::fmt;

/// Lifecycle of one tracked message.
///
/// `Pending -> Processing -> {Completed | Failed}`, with `Processing ->
/// Interrupted` and `Interrupted -> {Processing | Failed}` as the only other
/// edges. A pending message may also fail before it was ever acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Pending,
    Processing,
    Interrupted,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }

    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Interrupted)
                | (Interrupted, Processing)
                | (Interrupted, Failed)
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Processing => "processing",
            MessageStatus::Interrupted => "interrupted",
            MessageStatus::Completed => "completed",
            MessageStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Coordinator-side view of a receiver.
///
/// `Visible` and `Hidden` are sub-states of `Ready`; `TornDown` is terminal
/// and reachable from everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReceiverLifecycle {
    #[default]
    Unknown,
    Probing,
    Ready,
    Visible,
    Hidden,
    TornDown,
}

impl ReceiverLifecycle {
    /// True once the receiver has completed the readiness handshake.
    pub fn is_initialized(self) -> bool {
        matches!(
            self,
            ReceiverLifecycle::Ready | ReceiverLifecycle::Visible | ReceiverLifecycle::Hidden
        )
    }

    pub fn can_transition_to(self, next: ReceiverLifecycle) -> bool {
        use ReceiverLifecycle::*;
        match (self, next) {
            (TornDown, _) => false,
            (_, TornDown) => true,
            (Unknown, Probing) | (Probing, Unknown) => true,
            (Unknown | Probing, Ready) => true,
            (Ready | Visible | Hidden, Visible | Hidden) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ReceiverLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiverLifecycle::Unknown => "unknown",
            ReceiverLifecycle::Probing => "probing",
            ReceiverLifecycle::Ready => "ready",
            ReceiverLifecycle::Visible => "visible",
            ReceiverLifecycle::Hidden => "hidden",
            ReceiverLifecycle::TornDown => "torn_down",
        };
        f.write_str(name)
    }
}
