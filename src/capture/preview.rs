//! Revocable preview references for recorded video
//!
//! A preview is a temporary file holding the recording plus a `file://` URL that
//! a playback surface can bind to. Revoking deletes the file.

use std::io::{self, Write};
use std::path::Path;
use tempfile::TempPath;

/// Handle to a playable copy of a recording
#[derive(Debug)]
pub struct PreviewReference {
    path: TempPath,
    url: String,
}

impl PreviewReference {
    /// Write `bytes` to a fresh temp file in `dir`
    pub fn create(dir: &Path, extension: &str, bytes: &[u8]) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("bugcast-preview-")
            .suffix(&format!(".{}", extension))
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;

        let path = file.into_temp_path();
        let url = file_url(&path);
        Ok(Self { path, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the preview file
    pub fn revoke(self) -> io::Result<()> {
        self.path.close()
    }
}

/// Build a `file://` URL with each path segment percent-encoded
fn file_url(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    let encoded = normalized
        .split('/')
        .map(|segment| {
            // Keep Windows drive letters ("C:") readable
            if segment.len() == 2 && segment.ends_with(':') {
                segment.to_string()
            } else {
                urlencoding::encode(segment).into_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    if encoded.starts_with('/') {
        format!("file://{}", encoded)
    } else {
        format!("file:///{}", encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let preview = PreviewReference::create(dir.path(), "webm", b"video").unwrap();

        let path = preview.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"video");
        assert!(preview.url().starts_with("file://"));
        assert!(preview.url().ends_with(".webm"));

        preview.revoke().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let preview = PreviewReference::create(dir.path(), "webm", b"video").unwrap();
        let path = preview.path().to_path_buf();

        drop(preview);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_url_encodes_segments() {
        assert_eq!(
            file_url(Path::new("/tmp/bug reports/a.webm")),
            "file:///tmp/bug%20reports/a.webm"
        );
    }
}
