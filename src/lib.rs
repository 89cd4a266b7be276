//! bugcast
//!
//! Captures paired network logs and screen recordings for bug reports. A
//! [`BugReportSession`] drives a network channel and a screen channel through one
//! start/stop contract and hands the resulting artifacts to download or upload.

pub mod capture;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod network;
pub mod session;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{RecorderError, RecorderResult};
pub use session::{BugReportSession, SessionEvent, SessionState, UploadCallbacks, UploadReport};
