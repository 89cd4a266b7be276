//! ffmpeg-backed capture devices
//!
//! Acquisition resolves the platform input (x11grab, avfoundation or gdigrab for
//! the screen; pulse, avfoundation or dshow for audio) and checks that ffmpeg is
//! runnable. The recorder spawns a single ffmpeg process reading every track's
//! input and writing WebM to stdout; stdout reads become recorder chunks.
//! Finalizing sends `q` on stdin so ffmpeg writes the container trailer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::error::{RecorderError, RecorderResult};

use super::devices::{MediaDevices, MediaRecorder, RecorderEvent};
use super::stream::{MediaStream, MediaTrack, TrackKind};

/// How long ffmpeg gets to write its trailer after `q` before it is killed
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for the ffmpeg backend
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub ffmpeg_path: PathBuf,
    pub framerate: u32,
    pub display: Option<String>,
    pub microphone_device: Option<String>,
}

impl FfmpegSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            framerate: config.framerate,
            display: config.display.clone(),
            microphone_device: config.microphone_device.clone(),
        }
    }
}

/// The ffmpeg process holding the devices of a recording
#[derive(Debug)]
struct CaptureProcess {
    child: Mutex<Option<Child>>,
    finalizing: AtomicBool,
}

impl CaptureProcess {
    fn new(child: Child) -> Self {
        Self {
            child: Mutex::new(Some(child)),
            finalizing: AtomicBool::new(false),
        }
    }

    fn kill(&self) {
        if let Some(mut child) = self.child.lock().take() {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill ffmpeg: {}", e);
            }
        }
    }

    /// Release the devices unless the recorder is already finalizing
    fn release(&self) {
        if !self.finalizing.load(Ordering::SeqCst) {
            self.kill();
        }
    }
}

/// A device input resolved for ffmpeg
#[derive(Debug)]
pub struct FfmpegTrack {
    id: String,
    kind: TrackKind,
    label: String,
    input_args: Vec<String>,
    live: AtomicBool,
    process: Mutex<Option<Arc<CaptureProcess>>>,
}

impl FfmpegTrack {
    fn new(kind: TrackKind, label: impl Into<String>, input_args: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            input_args,
            live: AtomicBool::new(true),
            process: Mutex::new(None),
        })
    }

    fn attach(&self, process: Arc<CaptureProcess>) {
        *self.process.lock() = Some(process);
    }
}

impl MediaTrack for FfmpegTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        debug!("Releasing {} track", self.label);
        if let Some(process) = self.process.lock().take() {
            process.release();
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Screen and microphone capture through ffmpeg
pub struct FfmpegDevices {
    settings: FfmpegSettings,
    tracks: Mutex<HashMap<String, Weak<FfmpegTrack>>>,
}

impl FfmpegDevices {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self {
            settings,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    async fn ensure_ffmpeg(&self) -> RecorderResult<()> {
        let path = &self.settings.ffmpeg_path;
        let status = Command::new(path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                RecorderError::DeviceAcquisition(format!("ffmpeg not available at {:?}: {}", path, e))
            })?;

        if !status.success() {
            return Err(RecorderError::DeviceAcquisition(format!(
                "ffmpeg at {:?} exited with {}",
                path, status
            )));
        }
        Ok(())
    }

    fn register(&self, track: Arc<FfmpegTrack>) -> Arc<dyn MediaTrack> {
        let mut tracks = self.tracks.lock();
        tracks.retain(|_, weak| weak.strong_count() > 0);
        tracks.insert(track.id.clone(), Arc::downgrade(&track));
        track
    }

    fn lookup(&self, track: &Arc<dyn MediaTrack>) -> RecorderResult<Arc<FfmpegTrack>> {
        self.tracks
            .lock()
            .get(track.id())
            .and_then(Weak::upgrade)
            .ok_or_else(|| {
                RecorderError::DeviceAcquisition(format!(
                    "Track '{}' was not acquired by the ffmpeg backend",
                    track.label()
                ))
            })
    }

    #[cfg(target_os = "linux")]
    fn screen_input(&self) -> RecorderResult<Vec<String>> {
        let display = self
            .settings
            .display
            .clone()
            .or_else(|| std::env::var("DISPLAY").ok())
            .filter(|display| !display.is_empty())
            .ok_or_else(|| {
                RecorderError::DeviceAcquisition(
                    "No display server available (DISPLAY is not set)".to_string(),
                )
            })?;

        Ok(vec![
            "-f".into(),
            "x11grab".into(),
            "-framerate".into(),
            self.settings.framerate.to_string(),
            "-i".into(),
            display,
        ])
    }

    #[cfg(target_os = "macos")]
    fn screen_input(&self) -> RecorderResult<Vec<String>> {
        let screen = self.settings.display.clone().unwrap_or_else(|| "1".to_string());
        Ok(vec![
            "-f".into(),
            "avfoundation".into(),
            "-capture_cursor".into(),
            "1".into(),
            "-framerate".into(),
            self.settings.framerate.to_string(),
            "-i".into(),
            format!("{}:none", screen),
        ])
    }

    #[cfg(target_os = "windows")]
    fn screen_input(&self) -> RecorderResult<Vec<String>> {
        Ok(vec![
            "-f".into(),
            "gdigrab".into(),
            "-framerate".into(),
            self.settings.framerate.to_string(),
            "-i".into(),
            "desktop".into(),
        ])
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    fn screen_input(&self) -> RecorderResult<Vec<String>> {
        Err(RecorderError::DeviceAcquisition(
            "Screen capture is not supported on this platform".to_string(),
        ))
    }

    #[cfg(target_os = "linux")]
    fn system_audio_input(&self) -> Option<Vec<String>> {
        Some(vec![
            "-f".into(),
            "pulse".into(),
            "-i".into(),
            "@DEFAULT_MONITOR@".into(),
        ])
    }

    #[cfg(not(target_os = "linux"))]
    fn system_audio_input(&self) -> Option<Vec<String>> {
        None
    }

    #[cfg(target_os = "linux")]
    fn microphone_input(&self) -> RecorderResult<Vec<String>> {
        let device = self
            .settings
            .microphone_device
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Ok(vec!["-f".into(), "pulse".into(), "-i".into(), device])
    }

    #[cfg(target_os = "macos")]
    fn microphone_input(&self) -> RecorderResult<Vec<String>> {
        let device = self
            .settings
            .microphone_device
            .clone()
            .unwrap_or_else(|| "0".to_string());
        Ok(vec![
            "-f".into(),
            "avfoundation".into(),
            "-i".into(),
            format!(":{}", device),
        ])
    }

    #[cfg(target_os = "windows")]
    fn microphone_input(&self) -> RecorderResult<Vec<String>> {
        let device = self.settings.microphone_device.clone().ok_or_else(|| {
            RecorderError::DeviceAcquisition(
                "No microphone device configured (capture.microphone_device)".to_string(),
            )
        })?;
        Ok(vec![
            "-f".into(),
            "dshow".into(),
            "-i".into(),
            format!("audio={}", device),
        ])
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    fn microphone_input(&self) -> RecorderResult<Vec<String>> {
        Err(RecorderError::DeviceAcquisition(
            "Microphone capture is not supported on this platform".to_string(),
        ))
    }
}

#[async_trait]
impl MediaDevices for FfmpegDevices {
    async fn display_media(&self, system_audio: bool) -> RecorderResult<MediaStream> {
        let screen = self.screen_input()?;
        self.ensure_ffmpeg().await?;

        let mut tracks = vec![self.register(FfmpegTrack::new(TrackKind::Video, "screen", screen))];

        if system_audio {
            match self.system_audio_input() {
                Some(input) => {
                    tracks.push(self.register(FfmpegTrack::new(
                        TrackKind::Audio,
                        "system audio",
                        input,
                    )));
                }
                None => debug!("System audio capture not available on this platform"),
            }
        }

        info!("Acquired screen ({} tracks)", tracks.len());
        Ok(MediaStream::new(tracks))
    }

    async fn microphone(&self) -> RecorderResult<MediaStream> {
        let input = self.microphone_input()?;
        self.ensure_ffmpeg().await?;

        info!("Acquired microphone");
        Ok(MediaStream::new(vec![self.register(FfmpegTrack::new(
            TrackKind::Audio,
            "microphone",
            input,
        ))]))
    }

    fn recorder(&self, stream: &MediaStream) -> RecorderResult<Box<dyn MediaRecorder>> {
        let tracks = stream
            .tracks()
            .iter()
            .map(|track| self.lookup(track))
            .collect::<RecorderResult<Vec<_>>>()?;

        let video = tracks
            .iter()
            .find(|track| track.kind == TrackKind::Video)
            .ok_or_else(|| {
                RecorderError::DeviceAcquisition("Stream has no video track".to_string())
            })?;
        let audio: Vec<&[String]> = tracks
            .iter()
            .filter(|track| track.kind == TrackKind::Audio)
            .map(|track| track.input_args.as_slice())
            .collect();

        let args = recorder_args(&video.input_args, &audio);

        Ok(Box::new(FfmpegRecorder {
            ffmpeg_path: self.settings.ffmpeg_path.clone(),
            args,
            tracks,
            process: None,
            stdin: None,
        }))
    }
}

/// Build the ffmpeg command line: inputs, stream mapping, WebM to stdout
fn recorder_args(video_input: &[String], audio_inputs: &[&[String]]) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
    args.extend(video_input.iter().cloned());
    for input in audio_inputs {
        args.extend(input.iter().cloned());
    }

    args.extend(["-map".into(), "0:v".into()]);
    match audio_inputs.len() {
        0 => {}
        1 => args.extend(["-map".into(), "1:a".into()]),
        n => {
            let labels: String = (1..=n).map(|i| format!("[{}:a]", i)).collect();
            args.extend([
                "-filter_complex".into(),
                format!("{}amix=inputs={}[aout]", labels, n),
                "-map".into(),
                "[aout]".into(),
            ]);
        }
    }

    args.extend([
        "-c:v".into(),
        "libvpx".into(),
        "-deadline".into(),
        "realtime".into(),
        "-cpu-used".into(),
        "8".into(),
        "-b:v".into(),
        "2M".into(),
    ]);
    if !audio_inputs.is_empty() {
        args.extend(["-c:a".into(), "libopus".into()]);
    }
    args.extend(["-f".into(), "webm".into(), "pipe:1".into()]);
    args
}

/// Records a stream with one ffmpeg process
pub struct FfmpegRecorder {
    ffmpeg_path: PathBuf,
    args: Vec<String>,
    tracks: Vec<Arc<FfmpegTrack>>,
    process: Option<Arc<CaptureProcess>>,
    stdin: Option<ChildStdin>,
}

impl MediaRecorder for FfmpegRecorder {
    fn start(&mut self, tx: mpsc::UnboundedSender<RecorderEvent>) -> RecorderResult<()> {
        if self.process.is_some() {
            debug!("ffmpeg recorder already started");
            return Ok(());
        }

        debug!("Spawning {:?} {}", self.ffmpeg_path, self.args.join(" "));
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecorderError::DeviceAcquisition(format!("Failed to start ffmpeg: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            RecorderError::DeviceAcquisition("Failed to capture ffmpeg stdout".to_string())
        })?;
        self.stdin = child.stdin.take();

        let process = Arc::new(CaptureProcess::new(child));
        for track in &self.tracks {
            track.attach(process.clone());
        }

        tokio::spawn(forward_output(stdout, process.clone(), tx));
        self.process = Some(process);

        info!("ffmpeg recorder started ({} tracks)", self.tracks.len());
        Ok(())
    }

    fn stop(&mut self) {
        let Some(process) = self.process.clone() else {
            return;
        };
        if process.finalizing.swap(true, Ordering::SeqCst) {
            return;
        }

        let stdin = self.stdin.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(mut stdin) = stdin {
                        if let Err(e) = stdin.write_all(b"q").await {
                            warn!("Failed to signal ffmpeg to finish: {}", e);
                        }
                        let _ = stdin.shutdown().await;
                    }

                    tokio::time::sleep(FINALIZE_TIMEOUT).await;
                    if process.child.lock().is_some() {
                        warn!("ffmpeg did not finish within {:?}, killing", FINALIZE_TIMEOUT);
                        process.kill();
                    }
                });
            }
            Err(_) => {
                warn!("No runtime available to finalize ffmpeg, killing");
                process.kill();
            }
        }
    }
}

/// Forward ffmpeg stdout as chunks, then report the exit
async fn forward_output(
    stdout: ChildStdout,
    process: Arc<CaptureProcess>,
    tx: mpsc::UnboundedSender<RecorderEvent>,
) {
    let mut chunks = ReaderStream::new(stdout);
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(RecorderEvent::Data(bytes)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(RecorderEvent::Failed(format!("Failed to read ffmpeg output: {}", e)));
                break;
            }
        }
    }

    let child = process.child.lock().take();
    if let Some(mut child) = child {
        match wait_for_exit(&mut child, FINALIZE_TIMEOUT).await {
            Ok(status) if status.success() => debug!("ffmpeg exited cleanly"),
            Ok(status) => {
                let _ = tx.send(RecorderEvent::Failed(format!("ffmpeg exited with {}", status)));
            }
            Err(e) => {
                let _ = tx.send(RecorderEvent::Failed(format!("Failed to wait for ffmpeg: {}", e)));
            }
        }
    }

    let _ = tx.send(RecorderEvent::Stopped);
}

/// Wait for ffmpeg to exit, killing it if it lingers past `timeout`.
///
/// ffmpeg can close stdout and still hang on a device, so the stop-time kill alone
/// does not cover a child this task already owns.
async fn wait_for_exit(child: &mut Child, timeout: Duration) -> std::io::Result<ExitStatus> {
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("ffmpeg still running {:?} after its output ended, killing", timeout);
            child.start_kill()?;
            child.wait().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTrack;

    fn settings(ffmpeg_path: &str) -> FfmpegSettings {
        FfmpegSettings {
            ffmpeg_path: PathBuf::from(ffmpeg_path),
            framerate: 15,
            display: Some(":99".to_string()),
            microphone_device: Some("mic".to_string()),
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_args_video_only() {
        let video = strings(&["-f", "x11grab", "-i", ":0"]);
        let args = recorder_args(&video, &[]);

        assert_eq!(&args[3..7], video.as_slice());
        assert!(args.windows(2).any(|w| w == ["-map", "0:v"]));
        assert!(!args.iter().any(|a| a == "-c:a"));
        assert_eq!(&args[args.len() - 3..], ["-f", "webm", "pipe:1"]);
    }

    #[test]
    fn test_args_single_audio_is_mapped_directly() {
        let video = strings(&["-f", "x11grab", "-i", ":0"]);
        let mic = strings(&["-f", "pulse", "-i", "default"]);
        let args = recorder_args(&video, &[mic.as_slice()]);

        assert!(args.windows(2).any(|w| w == ["-map", "1:a"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "libopus"]));
        assert!(!args.iter().any(|a| a == "-filter_complex"));
    }

    #[test]
    fn test_args_multiple_audio_are_mixed() {
        let video = strings(&["-f", "x11grab", "-i", ":0"]);
        let system = strings(&["-f", "pulse", "-i", "@DEFAULT_MONITOR@"]);
        let mic = strings(&["-f", "pulse", "-i", "default"]);
        let args = recorder_args(&video, &[system.as_slice(), mic.as_slice()]);

        assert!(args
            .windows(2)
            .any(|w| w == ["-filter_complex", "[1:a][2:a]amix=inputs=2[aout]"]));
        assert!(args.windows(2).any(|w| w == ["-map", "[aout]"]));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_acquisition_error() {
        let devices = FfmpegDevices::new(settings("/nonexistent/bugcast-ffmpeg"));

        let err = devices.display_media(false).await.unwrap_err();
        assert!(matches!(err, RecorderError::DeviceAcquisition(_)));
    }

    #[test]
    fn test_recorder_rejects_foreign_tracks() {
        let devices = FfmpegDevices::new(settings("ffmpeg"));
        let stream = MediaStream::new(vec![FakeTrack::new(TrackKind::Video, "screen")]);

        let err = devices.recorder(&stream).err().unwrap();
        assert!(matches!(err, RecorderError::DeviceAcquisition(_)));
    }

    #[test]
    fn test_recorder_requires_video_track() {
        let devices = FfmpegDevices::new(settings("ffmpeg"));
        let mic = devices.register(FfmpegTrack::new(
            TrackKind::Audio,
            "microphone",
            strings(&["-f", "pulse", "-i", "default"]),
        ));

        let err = devices.recorder(&MediaStream::new(vec![mic])).err().unwrap();
        assert!(err.to_string().contains("no video track"));
    }

    #[test]
    fn test_track_stop_is_idempotent() {
        let track = FfmpegTrack::new(TrackKind::Video, "screen", Vec::new());
        assert!(track.is_live());
        track.stop();
        track.stop();
        assert!(!track.is_live());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_screen_input_uses_configured_display() {
        let devices = FfmpegDevices::new(settings("ffmpeg"));
        let input = devices.screen_input().unwrap();

        assert_eq!(input, strings(&["-f", "x11grab", "-framerate", "15", "-i", ":99"]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lingering_process_is_killed_after_timeout() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let started = std::time::Instant::now();
        let status = wait_for_exit(&mut child, Duration::from_millis(50)).await.unwrap();

        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_exit_keeps_status() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_for_exit(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(status.success());
    }
}
