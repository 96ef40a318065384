use std::fmt;

use cardrelay_core::{MessageId, ReceiverId};
use thiserror::Error;

use crate::persist::LastResult;
use crate::tracker::StatusChange;

/// Identifies one trigger-surface request inside the engine handle.
pub type RequestId = u64;

/// What a trigger surface hands to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRequest {
    pub text: String,
    pub url: String,
    pub title: String,
}

impl CardRequest {
    pub fn new(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            url: url.into(),
            title: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Generated card as returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageResult {
    /// Link to a hosted image (may itself be a `data:` URL).
    Url(String),
    /// Inline image data.
    Data(String),
}

impl ImageResult {
    /// Reference handed to the presenter, unchanged from what the service sent.
    pub fn image_ref(&self) -> &str {
        match self {
            ImageResult::Url(url) => url,
            ImageResult::Data(data) => data,
        }
    }

    pub fn into_image_ref(self) -> String {
        match self {
            ImageResult::Url(url) | ImageResult::Data(url) => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// `/status` did not answer with success.
    ServiceUnavailable,
    HttpStatus(u16),
    /// Success status but no usable image reference.
    MalformedPayload,
    Timeout,
    Network,
    /// Nothing to render.
    EmptyText,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ServiceUnavailable => write!(f, "service unavailable"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::MalformedPayload => write!(f, "malformed payload"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Network => write!(f, "network error"),
            FailureKind::EmptyText => write!(f, "empty text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    pub kind: FailureKind,
    pub message: String,
}

impl GenerationError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Returned by `deliver` once the receiver has acknowledged the command.
/// The final outcome arrives later as a status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("receiver {0} never became ready")]
    Unreachable(ReceiverId),
    #[error("transport failed: {0}")]
    TransportFailed(String),
    #[error("receiver rejected the command: {0}")]
    RejectedByReceiver(String),
    #[error("generation failed: {0}")]
    UpstreamFailed(GenerationError),
    #[error("message {0} abandoned after repeated interruptions")]
    Abandoned(MessageId),
    #[error("receiver {receiver} failed to initialize: {reason}")]
    InitializationFailed { receiver: ReceiverId, reason: String },
}

/// Events published by the engine handle to the trigger surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Status(StatusChange),
    /// The card was generated and is being presented.
    CardAccepted {
        request_id: RequestId,
        receiver: ReceiverId,
        message_id: MessageId,
        image_ref: String,
    },
    CardFailed {
        request_id: RequestId,
        error: DeliveryError,
    },
    LastResult(Option<LastResult>),
    ReceiverFailed {
        receiver: ReceiverId,
        error: DeliveryError,
    },
}
