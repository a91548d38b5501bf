//! Media resolver — picks one media reference from a capture buffer.
//!
//! Priority, first match wins:
//! 1. a playlist whose URL contains `master` (adaptive-bitrate manifest)
//! 2. any playlist
//! 3. any direct media file

use crate::types::{CapturedEvent, MediaReference, ResourceKind};

const MASTER_MARKER: &str = "master";

/// Resolve the best media reference, or `None` if the buffer has no media.
pub fn resolve_media(events: &[CapturedEvent]) -> Option<MediaReference> {
    let playlists = || events.iter().filter(|e| e.kind == ResourceKind::Playlist);

    playlists()
        .find(|e| e.url.to_ascii_lowercase().contains(MASTER_MARKER))
        .or_else(|| playlists().next())
        .or_else(|| events.iter().find(|e| e.kind == ResourceKind::DirectMedia))
        .map(|e| MediaReference {
            url: e.url.clone(),
            kind: e.kind,
        })
}
