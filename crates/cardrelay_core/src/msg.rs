use crate::{Command, MessageId, ReceiverId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Page finished loading; whether the extension runtime can be reached.
    Loaded { runtime_addressable: bool },
    /// Coordinator answered the "who am I" query.
    IdentityResolved { receiver: ReceiverId },
    /// The identity query budget ran out.
    IdentityExhausted { attempts: u32 },
    /// The "initialized" announcement was sent (or failed to send).
    AnnounceFinished { result: Result<(), String> },
    /// Page visibility signal.
    VisibilityChanged { visible: bool },
    /// A command arrived over the transport and expects an immediate reply.
    Command(Command),
    /// The presentation collaborator finished a preview.
    PresentationFinished {
        message_id: MessageId,
        result: Result<(), String>,
    },
    /// Navigation or unload.
    Unloaded,
}
