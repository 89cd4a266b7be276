//! Bug report session orchestrator
//!
//! Fans start/stop out to the network and screen channels, tracks the session
//! state machine and owns the post-stop operations (download, upload, teardown).
//! Status changes are broadcast as [`SessionEvent`]s.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::capture::{MediaDevices, ScreenChannel};
use crate::config::{Config, RecordingConfig};
use crate::data::VideoArtifact;
use crate::error::{RecorderError, RecorderResult};
use crate::network::{NetworkChannel, NetworkEventSource};
use crate::upload::UploadCallback;

use super::{SessionEvent, SessionState, UploadCallbacks, UploadReport};

/// Capacity of the status broadcast channel
const STATUS_CHANNEL_CAPACITY: usize = 16;

/// How long `upload_all` waits for a video that is still finalizing
const VIDEO_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Hook invoked with the upload results before teardown
pub type UploadedHook<'a, V, N> = &'a (dyn Fn(&UploadReport<V, N>) -> anyhow::Result<()> + Send + Sync);

/// Records paired network and screen evidence for one bug report at a time
pub struct BugReportSession {
    /// Audio, custom names and teardown behaviour
    settings: RecordingConfig,
    state: SessionState,
    session_id: Option<String>,
    network: NetworkChannel,
    screen: ScreenChannel,
    /// Free-text description typed alongside the recording
    description: String,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    status_tx: broadcast::Sender<SessionEvent>,
}

impl BugReportSession {
    pub fn new(
        config: &Config,
        source: Arc<dyn NetworkEventSource>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            settings: config.recording.clone(),
            state: SessionState::Idle,
            session_id: None,
            network: NetworkChannel::new(source),
            screen: ScreenChannel::new(devices, config.preview_dir()),
            description: String::new(),
            started_at: None,
            started: None,
            status_tx,
        }
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.status_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn network(&self) -> &NetworkChannel {
        &self.network
    }

    pub fn screen(&self) -> &ScreenChannel {
        &self.screen
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Wall-clock time the current recording started
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Time since the current recording started
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    /// Start both channels. No-op unless idle.
    ///
    /// A screen that cannot be acquired does not stop the network capture.
    pub async fn start(&mut self) {
        if self.state != SessionState::Idle {
            warn!("Cannot start recording in state {:?}", self.state);
            return;
        }

        let session_id = Config::new_session_id();
        info!("Starting bug report session {}", session_id);

        self.network.start();
        let screen = self.screen.start(self.settings.audio_enabled).await;
        if !screen {
            warn!("Screen capture unavailable, recording network activity only");
        }

        self.started_at = Some(Utc::now());
        self.started = Some(Instant::now());
        self.session_id = Some(session_id.clone());
        self.state = SessionState::Recording;

        self.emit(SessionEvent::Started { session_id, screen });
    }

    /// Stop both channels. No-op unless recording.
    ///
    /// Custom names fall back to the configured ones. The screen channel is
    /// stopped even when freezing the network log fails.
    pub fn stop(
        &mut self,
        network_file_name: Option<&str>,
        video_file_name: Option<&str>,
    ) -> RecorderResult<()> {
        if self.state != SessionState::Recording {
            debug!("Cannot stop recording in state {:?}", self.state);
            return Ok(());
        }

        let network_name = network_file_name.or(self.settings.network_file_name.as_deref());
        let video_name = video_file_name.or(self.settings.video_file_name.as_deref());

        let network = self.network.stop(network_name);
        self.screen.stop(video_name);
        self.state = SessionState::Stopped;

        info!(
            "Bug report session stopped after {:.1}s",
            self.elapsed().unwrap_or_default().as_secs_f64()
        );
        self.emit(SessionEvent::ReadyForReview);

        if let Err(e) = &network {
            error!("Failed to freeze network log: {}", e);
        }
        network
    }

    /// Wait for the screen recorder to finalize after stop
    pub async fn wait_until_ready(&self) -> RecorderResult<VideoArtifact> {
        self.screen.wait_for_video().await
    }

    /// Revoke the preview, clear the description and return to idle.
    ///
    /// Tearing down an active recording abandons it and releases both channels.
    /// A video still finalizing is abandoned too, so no preview outlives teardown.
    pub fn teardown(&mut self) {
        if self.state == SessionState::Recording {
            warn!("Tearing down an active recording");
            self.network.dispose();
            self.screen.dispose();
        }

        self.screen.cancel_finalize();
        self.screen.revoke_preview();
        self.description.clear();
        self.started_at = None;
        self.started = None;
        self.state = SessionState::Idle;

        if let Some(session_id) = self.session_id.take() {
            info!("Bug report session {} torn down", session_id);
        }
        self.emit(SessionEvent::TornDown);
    }

    /// Save the video and the network log into `dir`.
    ///
    /// Each artifact is saved independently; failures are logged. Returns the
    /// written paths.
    pub async fn download_all(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut saved = Vec::new();

        for result in [self.screen.download(dir).await, self.network.download(dir).await] {
            match result {
                Ok(path) => saved.push(path),
                Err(e) if e.is_no_artifact() => warn!("Skipping download: {}", e),
                Err(e) => error!("Download failed: {}", e),
            }
        }

        if self.settings.close_after_download {
            self.teardown();
        }
        saved
    }

    /// Upload the video, then the network log, through the given callbacks.
    ///
    /// Fails only when no callback is supplied. Otherwise each upload is attempted
    /// independently, failures are logged and left out of the report, the hook is
    /// called with the report and the session is torn down. A video that is still
    /// finalizing is awaited first.
    pub async fn upload_all<V, N>(
        &mut self,
        callbacks: UploadCallbacks<'_, V, N>,
        on_uploaded: Option<UploadedHook<'_, V::Output, N::Output>>,
    ) -> RecorderResult<UploadReport<V::Output, N::Output>>
    where
        V: UploadCallback + ?Sized,
        N: UploadCallback + ?Sized,
    {
        if callbacks.is_empty() {
            return Err(RecorderError::MissingCallback);
        }

        let video = match callbacks.video {
            Some(callback) => {
                self.await_video().await;
                attempt("video", self.screen.upload(Some(callback))).await
            }
            None => None,
        };
        let network = match callbacks.network {
            Some(callback) => attempt("network log", self.network.upload(Some(callback))).await,
            None => None,
        };

        let report = UploadReport { video, network };
        if let Some(hook) = on_uploaded {
            if let Err(e) = hook(&report) {
                error!("Upload hook failed: {:#}", e);
            }
        }

        self.emit(SessionEvent::Uploaded {
            video: report.video.is_some(),
            network: report.network.is_some(),
        });
        self.teardown();
        Ok(report)
    }

    async fn await_video(&self) {
        match tokio::time::timeout(VIDEO_READY_TIMEOUT, self.screen.wait_for_video()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!("No video to upload: {}", e),
            Err(_) => warn!("Video not ready after {:?}", VIDEO_READY_TIMEOUT),
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine
        let _ = self.status_tx.send(event);
    }
}

/// Run one upload, logging failures and panics instead of propagating them
async fn attempt<T, F>(what: &str, upload: F) -> Option<T>
where
    F: Future<Output = RecorderResult<T>>,
{
    match AssertUnwindSafe(upload).catch_unwind().await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!("Error uploading {}: {}", what, e);
            None
        }
        Err(_) => {
            error!("Upload callback for {} panicked", what);
            None
        }
    }
}
