//! Trigger panel state: what the popup shows while a card is being made.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    /// User asked for a card but nothing was selected.
    EmptySelection,
    Requested,
    Generating,
    /// The receiver accepted the preview command.
    Delivered { image_ref: String },
    /// The receiver reported the preview as shown.
    Shown,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelView {
    pub status_line: String,
    pub preview: Option<String>,
    pub can_save: bool,
    pub busy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelState {
    status_line: String,
    preview: Option<String>,
    busy: bool,
    dirty: bool,
}

impl PanelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: PanelEvent) {
        match event {
            PanelEvent::EmptySelection => {
                self.status_line = "Select some text first".to_string();
                self.busy = false;
            }
            PanelEvent::Requested => {
                // A new request hides the previous card until the new one arrives.
                self.preview = None;
                self.busy = true;
                self.status_line = "Connecting to server...".to_string();
            }
            PanelEvent::Generating => {
                self.status_line = "Generating card...".to_string();
            }
            PanelEvent::Delivered { image_ref } => {
                self.preview = Some(image_ref);
                self.busy = false;
                self.status_line = "Card generated!".to_string();
            }
            PanelEvent::Shown => {
                if self.preview.is_none() {
                    return;
                }
                self.status_line = "Card generated!".to_string();
            }
            PanelEvent::Failed { reason } => {
                self.busy = false;
                self.status_line = format!("Generation failed: {reason}");
            }
        }
        self.dirty = true;
    }

    pub fn view(&self) -> PanelView {
        PanelView {
            status_line: self.status_line.clone(),
            preview: self.preview.clone(),
            can_save: self.preview.is_some() && !self.busy,
            busy: self.busy,
        }
    }

    /// Returns whether anything changed since the last call.
    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
