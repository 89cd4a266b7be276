//! Materialized recording artifacts and their file names

use bytes::Bytes;
use chrono::Utc;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::info;

use crate::error::RecorderResult;

/// Which channel produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Newline-delimited JSON log of HTTP exchanges
    NetworkLog,
    /// Screen recording
    Video,
}

impl ArtifactKind {
    /// Stem used for timestamp-derived default names
    pub fn default_stem(self) -> &'static str {
        match self {
            Self::NetworkLog => "http-requests-log",
            Self::Video => "screen-record",
        }
    }

    /// File extension, without the dot
    pub fn extension(self) -> &'static str {
        match self {
            Self::NetworkLog => "txt",
            Self::Video => "webm",
        }
    }

    /// MIME type of the payload
    pub fn content_type(self) -> &'static str {
        match self {
            Self::NetworkLog => "text/plain",
            Self::Video => "video/webm",
        }
    }

    /// Resolve the artifact file name.
    ///
    /// A caller-supplied name is used verbatim with the extension appended;
    /// otherwise `<stem>-<epoch-millis>.<ext>`.
    /// Only the last path component of a custom name is kept.
    pub fn file_name(self, custom: Option<&str>) -> String {
        match custom.and_then(base_name) {
            Some(name) => format!("{}.{}", name, self.extension()),
            None => format!(
                "{}-{}.{}",
                self.default_stem(),
                Utc::now().timestamp_millis(),
                self.extension()
            ),
        }
    }
}

/// Final path component of a caller-supplied name, if a usable one is left
fn base_name(name: &str) -> Option<&str> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    (!base.is_empty() && base != "." && base != "..").then_some(base)
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkLog => f.write_str("requests"),
            Self::Video => f.write_str("video"),
        }
    }
}

/// Immutable payload produced by a channel at stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    kind: ArtifactKind,
    bytes: Bytes,
    file_name: String,
}

/// Network log artifact
pub type TextArtifact = Artifact;

/// Screen recording artifact
pub type VideoArtifact = Artifact;

impl Artifact {
    pub fn new(kind: ArtifactKind, bytes: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        Self {
            kind,
            bytes: bytes.into(),
            file_name: file_name.into(),
        }
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &'static str {
        self.kind.content_type()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Save the artifact under its file name inside `dir`.
    ///
    /// A file name that is not a single plain component is rejected.
    pub async fn save_to(&self, dir: &Path) -> RecorderResult<PathBuf> {
        let mut components = Path::new(&self.file_name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Refusing to save {:?} outside {:?}", self.file_name, dir),
            )
            .into());
        }

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.file_name);
        tokio::fs::write(&path, &self.bytes).await?;

        info!(
            "Saved {} artifact to {:?} ({} bytes)",
            self.kind,
            path,
            self.bytes.len()
        );
        Ok(path)
    }
}
