//! Message shapes exchanged between the coordinator and page agents.
use serde::{Deserialize, Serialize};
use url::Url;

/// Addressable execution context; one per tab.
pub type ReceiverId = u32;
/// Correlation id linking a command to its eventual outcome report.
pub type MessageId = u64;

/// Work the coordinator wants a receiver to perform. The correlation id is
/// attached when the payload is turned into a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    #[serde(rename_all = "camelCase")]
    ShowPreview { image_ref: String },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::ShowPreview { .. } => "showPreview",
        }
    }

    pub fn into_command(self, message_id: MessageId) -> Command {
        match self {
            Payload::ShowPreview { image_ref } => Command::ShowPreview {
                message_id,
                image_ref,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    Ping {
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    ShowPreview {
        message_id: MessageId,
        image_ref: String,
    },
    /// Anything the dispatcher has no route for.
    Unsupported { kind: String },
}

impl Command {
    pub fn kind(&self) -> &str {
        match self {
            Command::Ping { .. } => "ping",
            Command::ShowPreview { .. } => "showPreview",
            Command::Unsupported { kind } => kind,
        }
    }

    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Command::ShowPreview { message_id, .. } => Some(*message_id),
            Command::Ping { .. } | Command::Unsupported { .. } => None,
        }
    }
}

/// Immediate answer to a [`Command`]. For `showPreview` this only means
/// "received"; the outcome follows later as a separate report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Reply {
    #[serde(rename = "ok")]
    Pong { ready: bool, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    Accepted { message_id: MessageId },
    #[serde(rename = "error", rename_all = "camelCase")]
    Rejected {
        message_id: Option<MessageId>,
        reason: String,
    },
}

/// Final result of a presentation, reported out of band.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    Shown,
    Failed { error: String },
}

const RESTRICTED_SCHEMES: &[&str] = &[
    "about",
    "chrome",
    "chrome-extension",
    "chrome-search",
    "devtools",
    "edge",
    "moz-extension",
    "view-source",
];

/// Store pages refuse injected agents even though they are plain https.
const RESTRICTED_PAGES: &[(&str, &str)] = &[
    ("chrome.google.com", "/webstore"),
    ("chromewebstore.google.com", "/"),
    ("addons.mozilla.org", "/"),
];

/// Returns true for pages that can never host an agent. Unparsable input is
/// not considered restricted; probing decides for those.
pub fn is_restricted_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw.trim()) else {
        return false;
    };
    if RESTRICTED_SCHEMES
        .iter()
        .any(|scheme| url.scheme().eq_ignore_ascii_case(scheme))
    {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    RESTRICTED_PAGES
        .iter()
        .any(|(page_host, prefix)| host.eq_ignore_ascii_case(page_host) && url.path().starts_with(prefix))
}
