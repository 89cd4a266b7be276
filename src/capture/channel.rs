//! Screen capture channel
//!
//! Acquires the screen (and optionally the microphone), feeds recorder chunks to a
//! finalize task, and publishes the finished video through a watch channel once
//! the recorder reports it has stopped.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data::{Artifact, ArtifactKind, VideoArtifact};
use crate::error::{RecorderError, RecorderResult};
use crate::upload::{upload_artifact, UploadCallback};

use super::devices::{MediaDevices, MediaRecorder, RecorderEvent};
use super::preview::PreviewReference;
use super::stream::MediaStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Idle,
    Recording,
    Stopped,
}

/// The finalize task of one recording
struct Finalize {
    task: JoinHandle<()>,
    /// Set under the preview lock; a cancelled task publishes nothing
    cancelled: Arc<AtomicBool>,
    /// Set once the recorder has stopped emitting, for whatever reason
    ended: Arc<AtomicBool>,
}

/// Records the screen into a WebM artifact with a revocable preview
pub struct ScreenChannel {
    devices: Arc<dyn MediaDevices>,
    preview_dir: PathBuf,
    state: ChannelState,
    stream: Option<MediaStream>,
    recorder: Option<Box<dyn MediaRecorder>>,
    file_name: Arc<Mutex<Option<String>>>,
    video_rx: watch::Receiver<Option<VideoArtifact>>,
    preview: Arc<Mutex<Option<PreviewReference>>>,
    finalize: Option<Finalize>,
}

impl ScreenChannel {
    pub fn new(devices: Arc<dyn MediaDevices>, preview_dir: PathBuf) -> Self {
        let (_, video_rx) = watch::channel(None);
        Self {
            devices,
            preview_dir,
            state: ChannelState::Idle,
            stream: None,
            recorder: None,
            file_name: Arc::new(Mutex::new(None)),
            video_rx,
            preview: Arc::new(Mutex::new(None)),
            finalize: None,
        }
    }

    /// Whether a recording is running. False once the recorder has exited on its own.
    pub fn is_recording(&self) -> bool {
        self.state == ChannelState::Recording
            && self
                .finalize
                .as_ref()
                .map_or(true, |finalize| !finalize.ended.load(Ordering::SeqCst))
    }

    /// The finished video, once the recorder has finalized
    pub fn video(&self) -> Option<VideoArtifact> {
        self.video_rx.borrow().clone()
    }

    /// URL of the current preview, if one is live
    pub fn preview_url(&self) -> Option<String> {
        self.preview.lock().as_ref().map(|p| p.url().to_string())
    }

    /// Start recording. Returns true when a new recording began.
    ///
    /// Everything left from the previous recording is discarded first, so a
    /// failed start leaves the channel idle with no video.
    pub async fn start(&mut self, audio_enabled: bool) -> bool {
        if self.is_recording() {
            warn!("Screen recording already in progress");
            return false;
        }

        self.discard_previous();

        let stream = match self.acquire(audio_enabled).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Screen recording could not start: {}", e);
                return false;
            }
        };

        let mut recorder = match self.devices.recorder(&stream) {
            Ok(recorder) => recorder,
            Err(e) => {
                error!("Screen recording could not start: {}", e);
                stream.stop_all();
                return false;
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        if let Err(e) = recorder.start(events_tx) {
            error!("Screen recorder failed to start: {}", e);
            stream.stop_all();
            return false;
        }

        let (video_tx, video_rx) = watch::channel(None);
        let cancelled = Arc::new(AtomicBool::new(false));
        let ended = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(collect_video(
            events_rx,
            video_tx,
            FinalizeContext {
                file_name: self.file_name.clone(),
                preview: self.preview.clone(),
                preview_dir: self.preview_dir.clone(),
                cancelled: cancelled.clone(),
                ended: ended.clone(),
            },
        ));
        self.video_rx = video_rx;
        self.finalize = Some(Finalize {
            task,
            cancelled,
            ended,
        });

        info!(
            "Screen recording started ({} tracks, audio {})",
            stream.tracks().len(),
            if audio_enabled { "on" } else { "off" }
        );
        self.stream = Some(stream);
        self.recorder = Some(recorder);
        self.state = ChannelState::Recording;
        true
    }

    /// Ask the recorder to finalize and release every track.
    ///
    /// The video materializes later; use [`ScreenChannel::wait_for_video`].
    pub fn stop(&mut self, file_name: Option<&str>) {
        let Some(mut recorder) = self.recorder.take() else {
            debug!("No screen recording in progress");
            return;
        };

        *self.file_name.lock() = file_name.map(str::to_string);
        recorder.stop();
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
        self.state = ChannelState::Stopped;

        info!("Screen recording stopped, waiting for recorder to finalize");
    }

    /// Wait until the recorder has finalized and return the video.
    ///
    /// Fails with `NoArtifact` when the recording produced no video or its
    /// finalize was abandoned.
    pub async fn wait_for_video(&self) -> RecorderResult<VideoArtifact> {
        let no_video = || RecorderError::NoArtifact {
            kind: ArtifactKind::Video,
        };
        if self.state == ChannelState::Idle {
            return self.video().ok_or_else(no_video);
        }

        let mut video_rx = self.video_rx.clone();
        let video = video_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| no_video())?;
        video.clone().ok_or_else(no_video)
    }

    /// Save the video under its file name in `dir`
    pub async fn download(&self, dir: &Path) -> RecorderResult<PathBuf> {
        let video = self.video().ok_or(RecorderError::NoArtifact {
            kind: ArtifactKind::Video,
        })?;
        video.save_to(dir).await
    }

    /// Hand the video to an upload callback and return its result unchanged
    pub async fn upload<C>(&self, callback: Option<&C>) -> RecorderResult<C::Output>
    where
        C: UploadCallback + ?Sized,
    {
        let video = self.video();
        upload_artifact(video.as_ref(), ArtifactKind::Video, callback).await
    }

    /// Release the preview. Safe to call when there is none.
    pub fn revoke_preview(&self) {
        let Some(preview) = self.preview.lock().take() else {
            return;
        };
        let url = preview.url().to_string();
        match preview.revoke() {
            Ok(()) => debug!("Revoked preview {}", url),
            Err(e) => warn!("Failed to remove preview {}: {}", url, e),
        }
    }

    /// Abandon a finalize that has not completed yet.
    ///
    /// The video and preview of that recording never appear. A finished video
    /// is kept.
    pub fn cancel_finalize(&mut self) {
        let Some(finalize) = self.finalize.take() else {
            return;
        };
        {
            let _preview = self.preview.lock();
            finalize.cancelled.store(true, Ordering::SeqCst);
        }
        if !finalize.task.is_finished() {
            debug!("Abandoning pending screen recording finalize");
        }
        finalize.task.abort();
    }

    /// Release devices, the pending finalize and the preview
    pub fn dispose(&mut self) {
        self.cancel_finalize();
        // Dropping the recorder without stop() abandons the recording
        if self.recorder.take().is_some() {
            info!("Screen recording disposed while active");
        }
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
        self.revoke_preview();
        self.state = ChannelState::Idle;
    }

    async fn acquire(&self, audio_enabled: bool) -> RecorderResult<MediaStream> {
        let display = self.devices.display_media(audio_enabled).await?;
        if !audio_enabled {
            return Ok(display);
        }

        match self.devices.microphone().await {
            Ok(microphone) => Ok(MediaStream::composite(&display, &microphone)),
            Err(e) => {
                display.stop_all();
                Err(e)
            }
        }
    }

    /// Drop everything left from the previous recording: recorder, finalize,
    /// preview, file name and video
    fn discard_previous(&mut self) {
        self.cancel_finalize();
        self.recorder = None;
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
        if self.preview.lock().is_some() {
            warn!("Previous preview was not revoked, revoking before restart");
            self.revoke_preview();
        }
        *self.file_name.lock() = None;
        let (_, video_rx) = watch::channel(None);
        self.video_rx = video_rx;
        self.state = ChannelState::Idle;
    }
}

impl Drop for ScreenChannel {
    fn drop(&mut self) {
        if self.preview.lock().is_some() {
            warn!("Screen channel dropped with a live preview");
        }
        self.dispose();
    }
}

/// State a finalize task shares with its channel
struct FinalizeContext {
    file_name: Arc<Mutex<Option<String>>>,
    preview: Arc<Mutex<Option<PreviewReference>>>,
    preview_dir: PathBuf,
    cancelled: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

/// Buffer chunks until the recorder stops, then build the video and its preview.
///
/// A recorder that failed without producing any data yields no video.
async fn collect_video(
    mut events: mpsc::UnboundedReceiver<RecorderEvent>,
    video_tx: watch::Sender<Option<VideoArtifact>>,
    ctx: FinalizeContext,
) {
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut failures = 0usize;
    let mut finalized = false;

    while let Some(event) = events.recv().await {
        match event {
            RecorderEvent::Data(chunk) => {
                if !chunk.is_empty() {
                    chunks.push(chunk);
                }
            }
            RecorderEvent::Failed(message) => {
                failures += 1;
                error!("Screen recorder error: {}", message);
            }
            RecorderEvent::Stopped => {
                finalized = true;
                break;
            }
        }
    }
    ctx.ended.store(true, Ordering::SeqCst);

    if !finalized {
        debug!("Screen recorder went away without finalizing");
        return;
    }
    if chunks.is_empty() && failures > 0 {
        error!("Screen recorder failed before producing any video");
        return;
    }

    let mut data = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
    for chunk in &chunks {
        data.extend_from_slice(chunk);
    }
    let bytes = data.freeze();

    let name = ArtifactKind::Video.file_name(ctx.file_name.lock().as_deref());
    let video = Artifact::new(ArtifactKind::Video, bytes.clone(), name);

    let preview_dir = ctx.preview_dir.clone();
    let created = tokio::task::spawn_blocking(move || {
        PreviewReference::create(&preview_dir, ArtifactKind::Video.extension(), &bytes)
    })
    .await;

    let reference = match created {
        Ok(Ok(reference)) => Some(reference),
        Ok(Err(e)) => {
            error!("Failed to create video preview: {}", e);
            None
        }
        Err(e) => {
            error!("Preview task failed: {}", e);
            None
        }
    };

    {
        let mut slot = ctx.preview.lock();
        if ctx.cancelled.load(Ordering::SeqCst) {
            drop(slot);
            if let Some(reference) = reference {
                let _ = reference.revoke();
            }
            debug!("Screen recording finalized after being abandoned, discarding");
            return;
        }
        if let Some(reference) = reference {
            if let Some(stale) = slot.replace(reference) {
                let _ = stale.revoke();
            }
        }
    }

    info!(
        "Screen recording finalized: {} ({} chunks, {} bytes)",
        video.file_name(),
        chunks.len(),
        video.len()
    );
    video_tx.send_replace(Some(video));
}
