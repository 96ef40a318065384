use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cardrelay_core::{ReceiverId, ReceiverLifecycle};
use relay_logging::{relay_debug, relay_warn};
use tokio::time::Instant;

use crate::transport::AgentInstance;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverHandle {
    pub id: ReceiverId,
    pub lifecycle: ReceiverLifecycle,
    /// Page the receiver was last addressed for, if a trigger told us.
    pub url: Option<String>,
    pub last_ready_at: Option<Instant>,
    /// Agent instance that last reported on this receiver's lifecycle.
    pub agent: Option<AgentInstance>,
}

impl ReceiverHandle {
    fn new(id: ReceiverId) -> Self {
        Self {
            id,
            lifecycle: ReceiverLifecycle::Unknown,
            url: None,
            last_ready_at: None,
            agent: None,
        }
    }
}

/// Receiver handles owned by one coordinator.
#[derive(Debug, Default)]
pub struct ReceiverRegistry {
    handles: Mutex<HashMap<ReceiverId, ReceiverHandle>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current lifecycle, creating the handle on first contact.
    pub fn resolve(&self, id: ReceiverId, url: Option<&str>) -> ReceiverLifecycle {
        let mut handles = self.lock();
        let handle = handles.entry(id).or_insert_with(|| ReceiverHandle::new(id));
        if let Some(url) = url {
            handle.url = Some(url.to_string());
        }
        handle.lifecycle
    }

    pub fn lifecycle(&self, id: ReceiverId) -> Option<ReceiverLifecycle> {
        self.lock().get(&id).map(|handle| handle.lifecycle)
    }

    pub fn is_initialized(&self, id: ReceiverId) -> bool {
        self.lifecycle(id)
            .is_some_and(ReceiverLifecycle::is_initialized)
    }

    pub fn url(&self, id: ReceiverId) -> Option<String> {
        self.lock().get(&id).and_then(|handle| handle.url.clone())
    }

    pub fn snapshot(&self, id: ReceiverId) -> Option<ReceiverHandle> {
        self.lock().get(&id).cloned()
    }

    /// Applies a lifecycle edge; invalid edges and unknown ids are refused.
    pub fn transition(&self, id: ReceiverId, next: ReceiverLifecycle) -> bool {
        let mut handles = self.lock();
        let Some(handle) = handles.get_mut(&id) else {
            return false;
        };
        apply(handle, next)
    }

    /// Handshake completed. `visible` selects the sub-state when known.
    pub fn mark_ready(&self, id: ReceiverId, visible: Option<bool>) -> bool {
        let mut handles = self.lock();
        let Some(handle) = handles.get_mut(&id) else {
            return false;
        };
        if !handle.lifecycle.is_initialized() && !apply(handle, ReceiverLifecycle::Ready) {
            return false;
        }
        handle.last_ready_at = Some(Instant::now());
        if let Some(visible) = visible {
            apply(handle, visibility_state(visible));
        }
        true
    }

    /// Only initialized receivers have a visibility sub-state.
    pub fn set_visibility(&self, id: ReceiverId, visible: bool) -> bool {
        let mut handles = self.lock();
        match handles.get_mut(&id) {
            Some(handle) if handle.lifecycle.is_initialized() => {
                apply(handle, visibility_state(visible))
            }
            _ => false,
        }
    }

    /// Records `instance` as the agent speaking for `id`. Returns false when
    /// a newer agent was already seen, i.e. `instance` has been replaced.
    pub fn claim(&self, id: ReceiverId, instance: AgentInstance) -> bool {
        let mut handles = self.lock();
        let Some(handle) = handles.get_mut(&id) else {
            return true;
        };
        match handle.agent {
            Some(current) if current > instance => false,
            _ => {
                handle.agent = Some(instance);
                true
            }
        }
    }

    /// Discards the handle. Returns it in its final `TornDown` state.
    pub fn tear_down(&self, id: ReceiverId) -> Option<ReceiverHandle> {
        let mut handle = self.lock().remove(&id)?;
        apply(&mut handle, ReceiverLifecycle::TornDown);
        Some(handle)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ReceiverId, ReceiverHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn visibility_state(visible: bool) -> ReceiverLifecycle {
    if visible {
        ReceiverLifecycle::Visible
    } else {
        ReceiverLifecycle::Hidden
    }
}

fn apply(handle: &mut ReceiverHandle, next: ReceiverLifecycle) -> bool {
    if handle.lifecycle == next {
        return true;
    }
    if !handle.lifecycle.can_transition_to(next) {
        relay_warn!(
            "receiver {} refused lifecycle edge {} -> {}",
            handle.id,
            handle.lifecycle,
            next
        );
        return false;
    }
    relay_debug!("receiver {} {} -> {}", handle.id, handle.lifecycle, next);
    handle.lifecycle = next;
    true
}
