//! Media streams and tracks

use std::fmt;
use std::sync::Arc;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One acquired capture device (screen, system audio, microphone)
pub trait MediaTrack: Send + Sync + fmt::Debug {
    /// Unique track identifier
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Human-readable source label
    fn label(&self) -> &str;

    /// Release the underlying device. Idempotent.
    fn stop(&self);

    /// Whether the device is still held
    fn is_live(&self) -> bool;
}

/// A set of tracks recorded together
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    /// Combine the screen's video and system audio with a microphone's audio
    pub fn composite(display: &MediaStream, microphone: &MediaStream) -> Self {
        let tracks = display
            .tracks_of(TrackKind::Video)
            .chain(display.tracks_of(TrackKind::Audio))
            .chain(microphone.tracks_of(TrackKind::Audio))
            .cloned()
            .collect();
        Self { tracks }
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<dyn MediaTrack>> {
        self.tracks.iter().filter(move |track| track.kind() == kind)
    }

    /// Whether any track still holds its device
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|track| track.is_live())
    }

    /// Stop and release every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}
