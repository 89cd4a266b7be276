//! Capture device and recorder capabilities

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::RecorderResult;

use super::MediaStream;

/// Output of a running recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// An encoded chunk of the container
    Data(Bytes),
    /// Non-fatal recorder error; a `Stopped` still follows
    Failed(String),
    /// Recorder finalized; no further events follow
    Stopped,
}

/// Encodes a stream into chunks
pub trait MediaRecorder: Send + Sync {
    /// Begin recording, delivering chunks to `tx`
    fn start(&mut self, tx: mpsc::UnboundedSender<RecorderEvent>) -> RecorderResult<()>;

    /// Ask the recorder to finalize.
    ///
    /// Returns immediately; `RecorderEvent::Stopped` is sent once the last chunk is out.
    fn stop(&mut self);
}

/// Acquires screen and microphone streams
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire the screen, plus system audio when requested and available
    async fn display_media(&self, system_audio: bool) -> RecorderResult<MediaStream>;

    /// Acquire the default microphone
    async fn microphone(&self) -> RecorderResult<MediaStream>;

    /// Create a recorder for an acquired stream
    fn recorder(&self, stream: &MediaStream) -> RecorderResult<Box<dyn MediaRecorder>>;
}
