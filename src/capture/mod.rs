//! Screen capture: media capabilities, ffmpeg backend, preview references, channel

mod channel;
mod devices;
mod ffmpeg;
mod preview;
mod stream;

pub use channel::ScreenChannel;
pub use devices::{MediaDevices, MediaRecorder, RecorderEvent};
pub use ffmpeg::{FfmpegDevices, FfmpegRecorder, FfmpegSettings, FfmpegTrack};
pub use preview::PreviewReference;
pub use stream::{MediaStream, MediaTrack, TrackKind};
