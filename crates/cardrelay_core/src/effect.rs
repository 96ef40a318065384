use crate::{MessageId, PreviewOutcome, ReceiverId, Reply};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Answer the command currently being dispatched.
    Reply(Reply),
    /// Ask the coordinator for this agent's identity, with retries.
    AcquireIdentity,
    AnnounceInitialized { receiver: ReceiverId, visible: bool },
    /// Hand an image to the presentation collaborator.
    Present {
        message_id: MessageId,
        image_ref: String,
    },
    ReportOutcome {
        message_id: MessageId,
        outcome: PreviewOutcome,
    },
    ReportVisibility { visible: bool },
    ReportInitFailure { reason: String },
    ReportUnloaded,
}
