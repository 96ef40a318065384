//! Cardrelay core: pure state machines and protocol shapes.
mod effect;
mod msg;
mod protocol;
mod state;
mod status;
mod update;
mod view_model;

pub use effect::Effect;
pub use msg::Msg;
pub use protocol::{
    is_restricted_url, Command, MessageId, Payload, PreviewOutcome, ReceiverId, Reply,
};
pub use state::{AgentPhase, AgentState};
pub use status::{MessageStatus, ReceiverLifecycle};
pub use update::update;
pub use view_model::{PanelEvent, PanelState, PanelView};
