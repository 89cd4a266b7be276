//! Session orchestration - one start/stop contract over both capture channels

mod orchestrator;

pub use orchestrator::BugReportSession;

use crate::upload::UploadCallback;

/// Lifecycle of a bug report session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Stopped,
}

/// Status updates broadcast to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Both channels were asked to start
    Started {
        /// Session ID
        session_id: String,
        /// Whether the screen channel is actually recording
        screen: bool,
    },
    /// Recording stopped; artifacts are (or will shortly be) available
    ReadyForReview,
    /// upload_all finished
    Uploaded {
        video: bool,
        network: bool,
    },
    /// Session returned to idle
    TornDown,
}

/// Upload callbacks for [`BugReportSession::upload_all`]; either may be absent
pub struct UploadCallbacks<'a, V: ?Sized, N: ?Sized> {
    pub video: Option<&'a V>,
    pub network: Option<&'a N>,
}

impl<'a, V, N> UploadCallbacks<'a, V, N>
where
    V: UploadCallback + ?Sized,
    N: UploadCallback + ?Sized,
{
    pub fn new(video: Option<&'a V>, network: Option<&'a N>) -> Self {
        Self { video, network }
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.network.is_none()
    }
}

/// Results of [`BugReportSession::upload_all`].
///
/// A field is `None` when its callback was not supplied or the upload failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport<V, N> {
    pub video: Option<V>,
    pub network: Option<N>,
}
