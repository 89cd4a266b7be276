//! Network capture channel
//!
//! Buffers exchanges from a [`NetworkEventSource`] between start and stop and
//! freezes them into a text artifact at stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::data::{encode_log, Artifact, ArtifactKind, RequestLogBuffer, RequestLogEntry, TextArtifact};
use crate::error::{RecorderError, RecorderResult};
use crate::upload::{upload_artifact, UploadCallback};

use super::source::{NetworkEventSource, Subscription};

/// Records HTTP exchanges into a newline-delimited JSON log
pub struct NetworkChannel {
    source: Arc<dyn NetworkEventSource>,
    recording: bool,
    subscription: Option<Subscription>,
    events_rx: Option<mpsc::UnboundedReceiver<RequestLogEntry>>,
    buffer: RequestLogBuffer,
    artifact: Option<TextArtifact>,
}

impl NetworkChannel {
    pub fn new(source: Arc<dyn NetworkEventSource>) -> Self {
        Self {
            source,
            recording: false,
            subscription: None,
            events_rx: None,
            buffer: RequestLogBuffer::new(),
            artifact: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// The artifact frozen by the last stop, if any entries were captured
    pub fn artifact(&self) -> Option<&TextArtifact> {
        self.artifact.as_ref()
    }

    /// Number of entries captured in the current (or last) recording
    pub fn entry_count(&mut self) -> usize {
        self.pump();
        self.buffer.len()
    }

    /// Start capturing. No-op while already recording.
    pub fn start(&mut self) {
        if self.recording {
            warn!("Network recording already in progress");
            return;
        }

        self.buffer.clear();
        self.artifact = None;

        let (tx, rx) = mpsc::unbounded_channel();
        self.source.start();
        self.subscription = Some(self.source.subscribe(tx));
        self.events_rx = Some(rx);
        self.recording = true;

        info!("Network recording started");
    }

    /// Stop capturing and freeze the log. No-op while not recording.
    ///
    /// Produces no artifact when nothing was captured.
    pub fn stop(&mut self, file_name: Option<&str>) -> RecorderResult<()> {
        if !self.recording {
            debug!("No network recording in progress");
            return Ok(());
        }

        // Unsubscribing drops the sender, so the drain below sees every delivered entry
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.pump();
        self.events_rx = None;
        self.source.stop();
        self.recording = false;

        if self.buffer.is_empty() {
            info!("Network recording stopped with no requests captured");
            return Ok(());
        }

        let text = encode_log(self.buffer.as_slice())?;
        let artifact = Artifact::new(
            ArtifactKind::NetworkLog,
            text.into_bytes(),
            ArtifactKind::NetworkLog.file_name(file_name),
        );

        info!(
            "Network recording stopped: {} requests in {}",
            self.buffer.len(),
            artifact.file_name()
        );
        self.artifact = Some(artifact);
        Ok(())
    }

    /// Save the log under its file name in `dir`
    pub async fn download(&self, dir: &Path) -> RecorderResult<PathBuf> {
        let artifact = self.artifact.as_ref().ok_or(RecorderError::NoArtifact {
            kind: ArtifactKind::NetworkLog,
        })?;
        artifact.save_to(dir).await
    }

    /// Hand the log to an upload callback and return its result unchanged
    pub async fn upload<C>(&self, callback: Option<&C>) -> RecorderResult<C::Output>
    where
        C: UploadCallback + ?Sized,
    {
        upload_artifact(self.artifact.as_ref(), ArtifactKind::NetworkLog, callback).await
    }

    /// Release the subscription and the source on any exit path
    pub fn dispose(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.events_rx = None;
        if self.recording {
            self.source.stop();
            self.recording = false;
            info!("Network recording disposed while active");
        }
    }

    /// Move delivered entries from the channel into the buffer
    fn pump(&mut self) {
        let Some(rx) = self.events_rx.as_mut() else {
            return;
        };
        while let Ok(entry) = rx.try_recv() {
            self.buffer.push(entry);
        }
    }
}

impl Drop for NetworkChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}
