use cardrelay_core::ReceiverId;
use cardrelay_engine::{Presenter, PreviewError};
use relay_logging::{clip, relay_info};

/// Shows cards by printing their reference to the terminal.
pub(crate) struct TerminalPresenter {
    tab: ReceiverId,
}

impl TerminalPresenter {
    pub(crate) fn new(tab: ReceiverId) -> Self {
        Self { tab }
    }
}

#[async_trait::async_trait]
impl Presenter for TerminalPresenter {
    async fn show_preview(&self, image_ref: &str) -> Result<(), PreviewError> {
        if image_ref.trim().is_empty() {
            return Err(PreviewError("image failed to load".to_string()));
        }
        relay_info!("tab {} presenting card", self.tab);
        println!("[tab {}] card preview: {}", self.tab, clip(image_ref, 72));
        Ok(())
    }
}
