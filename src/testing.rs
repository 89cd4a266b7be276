//! Test doubles shared by unit tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::{MediaDevices, MediaRecorder, MediaStream, MediaTrack, RecorderEvent, TrackKind};
use crate::error::{RecorderError, RecorderResult};

/// Serve a single HTTP request on a local port.
///
/// Returns the base URL (ending in `/`) and a handle resolving to the raw request.
pub async fn spawn_http_server(status: u16, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = body.to_string();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let response = format!(
            "HTTP/1.1 {} Test\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}/", addr), handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let content_length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok());

            let complete = match content_length {
                Some(len) => buf.len() >= end + 4 + len,
                None if head.contains("transfer-encoding: chunked") => buf.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                break;
            }
        }

        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// In-memory track
#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: TrackKind,
    label: String,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(kind: TrackKind, label: &str) -> Arc<dyn MediaTrack> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            label: label.to_string(),
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
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
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct FakeRecorderState {
    tx: Option<mpsc::UnboundedSender<RecorderEvent>>,
    started: bool,
    stopped: bool,
    track_labels: Vec<String>,
}

/// Drives a [`FakeRecorder`] from a test
#[derive(Clone, Default)]
pub struct FakeRecorderHandle {
    state: Arc<Mutex<FakeRecorderState>>,
}

impl FakeRecorderHandle {
    /// Deliver a chunk as if the encoder produced it
    pub fn emit(&self, chunk: &[u8]) {
        if let Some(tx) = self.state.lock().tx.as_ref() {
            let _ = tx.send(RecorderEvent::Data(Bytes::copy_from_slice(chunk)));
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(tx) = self.state.lock().tx.as_ref() {
            let _ = tx.send(RecorderEvent::Failed(message.to_string()));
        }
    }

    /// Report the end of the stream without anyone calling `stop`, like an
    /// encoder process that exits on its own
    pub fn finish(&self) {
        if let Some(tx) = self.state.lock().tx.take() {
            let _ = tx.send(RecorderEvent::Stopped);
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Labels of the tracks the recorder was created for
    pub fn track_labels(&self) -> Vec<String> {
        self.state.lock().track_labels.clone()
    }
}

/// Recorder that emits whatever the test tells it to
pub struct FakeRecorder {
    handle: FakeRecorderHandle,
    fail_start: bool,
}

impl MediaRecorder for FakeRecorder {
    fn start(&mut self, tx: mpsc::UnboundedSender<RecorderEvent>) -> RecorderResult<()> {
        if self.fail_start {
            return Err(RecorderError::DeviceAcquisition("Encoder unavailable".to_string()));
        }
        let mut state = self.handle.state.lock();
        state.tx = Some(tx);
        state.started = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.handle.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        if let Some(tx) = state.tx.take() {
            let _ = tx.send(RecorderEvent::Stopped);
        }
    }
}

/// Devices backed by [`FakeTrack`] and [`FakeRecorder`]
#[derive(Default)]
pub struct FakeDevices {
    deny_display: AtomicBool,
    deny_microphone: AtomicBool,
    fail_recorder_start: AtomicBool,
    system_audio: bool,
    acquired: Mutex<Vec<Arc<dyn MediaTrack>>>,
    recorders: Mutex<Vec<FakeRecorderHandle>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying_display(self) -> Self {
        self.deny_display(true);
        self
    }

    pub fn denying_microphone(self) -> Self {
        self.deny_microphone.store(true, Ordering::SeqCst);
        self
    }

    /// Change display permission between recordings
    pub fn deny_display(&self, deny: bool) {
        self.deny_display.store(deny, Ordering::SeqCst);
    }

    /// Make the next recorders fail in `start`
    pub fn fail_recorder_start(&self, fail: bool) {
        self.fail_recorder_start.store(fail, Ordering::SeqCst);
    }

    pub fn with_system_audio(mut self) -> Self {
        self.system_audio = true;
        self
    }

    /// Every track handed out so far
    pub fn acquired_tracks(&self) -> Vec<Arc<dyn MediaTrack>> {
        self.acquired.lock().clone()
    }

    pub fn recorder_count(&self) -> usize {
        self.recorders.lock().len()
    }

    /// Handle to the most recently created recorder
    pub fn last_recorder(&self) -> Option<FakeRecorderHandle> {
        self.recorders.lock().last().cloned()
    }

    fn acquire(&self, kind: TrackKind, label: &str) -> Arc<dyn MediaTrack> {
        let track = FakeTrack::new(kind, label);
        self.acquired.lock().push(track.clone());
        track
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn display_media(&self, system_audio: bool) -> RecorderResult<MediaStream> {
        if self.deny_display.load(Ordering::SeqCst) {
            return Err(RecorderError::DeviceAcquisition("Permission denied".to_string()));
        }

        let mut tracks = vec![self.acquire(TrackKind::Video, "screen")];
        if system_audio && self.system_audio {
            tracks.push(self.acquire(TrackKind::Audio, "system audio"));
        }
        Ok(MediaStream::new(tracks))
    }

    async fn microphone(&self) -> RecorderResult<MediaStream> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(RecorderError::DeviceAcquisition(
                "Microphone permission denied".to_string(),
            ));
        }
        Ok(MediaStream::new(vec![self.acquire(TrackKind::Audio, "microphone")]))
    }

    fn recorder(&self, stream: &MediaStream) -> RecorderResult<Box<dyn MediaRecorder>> {
        let handle = FakeRecorderHandle::default();
        handle.state.lock().track_labels = stream
            .tracks()
            .iter()
            .map(|track| track.label().to_string())
            .collect();
        self.recorders.lock().push(handle.clone());
        Ok(Box::new(FakeRecorder {
            handle,
            fail_start: self.fail_recorder_start.load(Ordering::SeqCst),
        }))
    }
}
