//! Cardrelay engine: readiness-gated delivery of commands to page agents.
mod agent;
mod config;
mod coordinator;
mod engine;
mod generation;
mod persist;
mod prober;
mod registry;
mod retry;
mod tracker;
mod transport;
mod types;

pub use agent::{spawn_agent, AgentHandle, Presenter, PreviewError};
pub use config::{EngineConfig, ServiceSettings};
pub use coordinator::{CardDelivery, Coordinator};
pub use engine::EngineHandle;
pub use generation::{GenerationService, ReqwestGenerationClient};
pub use persist::{ensure_state_dir, write_atomically, LastResult, LastResultSlot, PersistError};
pub use prober::Prober;
pub use registry::{ReceiverHandle, ReceiverRegistry};
pub use retry::RetryPolicy;
pub use tracker::{
    ChannelStatusSubscriber, FailureReason, Resubmission, StatusChange, StatusSubscriber,
    StatusTracker, TrackedMessage,
};
pub use transport::{
    AgentInstance, AgentLink, Envelope, Inbound, LocalHub, Responder, RuntimeEvent, Transport,
    TransportError,
};
pub use types::{
    Ack, CardRequest, DeliveryError, EngineEvent, FailureKind, GenerationError, ImageResult,
    RequestId,
};
