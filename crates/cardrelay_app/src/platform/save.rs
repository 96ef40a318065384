//! Writing the previewed card to disk, the panel's download button.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cardrelay_core::PanelView;
use cardrelay_engine::write_atomically;
use relay_logging::{clip, relay_info};

pub(crate) const DEFAULT_FILENAME: &str = "share-card.png";

/// The card the panel currently offers for saving, if any.
pub(crate) fn saveable_card(view: &PanelView) -> Option<&str> {
    if view.can_save {
        view.preview.as_deref()
    } else {
        None
    }
}

/// Decodes an inline `data:image/...;base64,` card. Remote cards live on the
/// service and are not fetched again.
pub(crate) fn card_bytes(image_ref: &str) -> anyhow::Result<Vec<u8>> {
    let Some((media, encoded)) = image_ref
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
    else {
        bail!("card is hosted at {}, open it there to save", clip(image_ref, 72));
    };
    if !media.starts_with("image/") {
        bail!("card data is {media}, not an image");
    }
    STANDARD
        .decode(encoded.trim())
        .context("card data is not valid base64")
}

pub(crate) fn save_card(view: &PanelView, target: &Path) -> anyhow::Result<PathBuf> {
    let Some(image_ref) = saveable_card(view) else {
        bail!("no card to save yet");
    };
    let bytes = card_bytes(image_ref)?;
    let filename = target
        .file_name()
        .and_then(OsStr::to_str)
        .with_context(|| format!("`{}` does not name a file", target.display()))?;
    let dir = target
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let saved = write_atomically(dir, filename, &bytes)
        .with_context(|| format!("saving card to {}", target.display()))?;
    relay_info!("saved card ({} bytes) to {:?}", bytes.len(), saved);
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use cardrelay_core::{PanelEvent, PanelState};

    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n";
    const CARD: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn delivered(image_ref: &str) -> PanelState {
        let mut panel = PanelState::new();
        panel.apply(PanelEvent::Requested);
        panel.apply(PanelEvent::Generating);
        panel.apply(PanelEvent::Delivered {
            image_ref: image_ref.to_string(),
        });
        panel
    }

    #[test]
    fn only_a_finished_card_can_be_saved() {
        let mut panel = PanelState::new();
        assert_eq!(saveable_card(&panel.view()), None);

        panel = delivered(CARD);
        assert_eq!(saveable_card(&panel.view()), Some(CARD));

        // A new request hides the previous card.
        panel.apply(PanelEvent::Requested);
        assert_eq!(saveable_card(&panel.view()), None);
        assert!(save_card(&panel.view(), Path::new(DEFAULT_FILENAME))
            .unwrap_err()
            .to_string()
            .contains("no card"));
    }

    #[test]
    fn inline_cards_decode_to_png_bytes() {
        assert_eq!(card_bytes(CARD).unwrap(), PNG_HEADER);
        assert!(card_bytes("https://cards.example/1.png")
            .unwrap_err()
            .to_string()
            .contains("hosted at"));
        assert!(card_bytes("data:text/plain;base64,aGk=").is_err());
        assert!(card_bytes("data:image/png;base64,***").is_err());
    }

    #[test]
    fn saving_writes_the_decoded_card() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("cards").join("fox.png");

        let saved = save_card(&delivered(CARD).view(), &target).unwrap();

        assert_eq!(saved, target);
        assert_eq!(std::fs::read(&saved).unwrap(), PNG_HEADER);
    }
}
