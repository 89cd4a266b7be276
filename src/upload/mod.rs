//! Upload plumbing shared by both channels
//!
//! Both channels hand their artifact to a caller-supplied [`UploadCallback`] as a
//! single-field multipart payload. The callback owns transport, retries and error
//! translation; channels pass its result (or error) through untouched.

mod http;

pub use http::HttpUploader;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use std::future::Future;
use tracing::info;

use crate::data::{Artifact, ArtifactKind};
use crate::error::{RecorderError, RecorderResult};

/// Multipart field name carrying the artifact
pub const FILE_FIELD: &str = "file";

/// A single-file multipart payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPayload {
    /// Form field name, always [`FILE_FIELD`] for channel uploads
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl MultipartPayload {
    /// Convert into a reqwest multipart form
    pub fn into_form(self) -> reqwest::Result<Form> {
        let part = Part::bytes(self.bytes.to_vec())
            .file_name(self.file_name)
            .mime_str(&self.content_type)?;
        Ok(Form::new().part(self.field, part))
    }
}

impl From<&Artifact> for MultipartPayload {
    fn from(artifact: &Artifact) -> Self {
        Self {
            field: FILE_FIELD.to_string(),
            file_name: artifact.file_name().to_string(),
            content_type: artifact.content_type().to_string(),
            bytes: artifact.bytes().clone(),
        }
    }
}

/// Caller-supplied upload transport
#[async_trait]
pub trait UploadCallback: Send + Sync {
    /// Whatever the transport reports back on success
    type Output: Send;

    async fn upload(&self, payload: MultipartPayload) -> anyhow::Result<Self::Output>;
}

/// Adapts an async closure into an [`UploadCallback`]
pub struct UploadFn<F>(F);

impl<F> UploadFn<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut, T> UploadCallback for UploadFn<F>
where
    F: Fn(MultipartPayload) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn upload(&self, payload: MultipartPayload) -> anyhow::Result<T> {
        (self.0)(payload).await
    }
}

/// Upload an artifact through a callback.
///
/// Fails fast when the artifact or the callback is missing; otherwise returns
/// exactly what the callback returns.
pub(crate) async fn upload_artifact<C>(
    artifact: Option<&Artifact>,
    kind: ArtifactKind,
    callback: Option<&C>,
) -> RecorderResult<C::Output>
where
    C: UploadCallback + ?Sized,
{
    let artifact = artifact.ok_or(RecorderError::NoArtifact { kind })?;
    let callback = callback.ok_or(RecorderError::MissingCallback)?;

    info!(
        "Uploading {} artifact {} ({} bytes)",
        kind,
        artifact.file_name(),
        artifact.len()
    );

    callback
        .upload(MultipartPayload::from(artifact))
        .await
        .map_err(RecorderError::Callback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_artifact() {
        let artifact = Artifact::new(ArtifactKind::Video, vec![1u8, 2, 3], "repro.webm");
        let payload = MultipartPayload::from(&artifact);

        assert_eq!(payload.field, "file");
        assert_eq!(payload.file_name, "repro.webm");
        assert_eq!(payload.content_type, "video/webm");
        assert_eq!(payload.bytes.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upload_artifact_returns_callback_result() {
        let artifact = Artifact::new(ArtifactKind::NetworkLog, "{}", "log.txt");
        let callback = UploadFn::new(|payload: MultipartPayload| async move {
            Ok(format!("{}:{}", payload.field, payload.file_name))
        });

        let result = upload_artifact(Some(&artifact), ArtifactKind::NetworkLog, Some(&callback))
            .await
            .unwrap();
        assert_eq!(result, "file:log.txt");
    }

    #[tokio::test]
    async fn test_upload_artifact_passes_callback_error_through() {
        let artifact = Artifact::new(ArtifactKind::NetworkLog, "{}", "log.txt");
        let callback = UploadFn::new(|_payload: MultipartPayload| async move {
            Err::<(), _>(anyhow::anyhow!("server said no"))
        });

        let err = upload_artifact(Some(&artifact), ArtifactKind::NetworkLog, Some(&callback))
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::Callback(_)));
        assert_eq!(err.to_string(), "server said no");
    }

    #[tokio::test]
    async fn test_missing_artifact_checked_before_callback() {
        let err = upload_artifact::<HttpUploader>(None, ArtifactKind::Video, None)
            .await
            .unwrap_err();
        assert!(err.is_no_artifact());

        let artifact = Artifact::new(ArtifactKind::Video, vec![0u8], "v.webm");
        let err = upload_artifact::<HttpUploader>(Some(&artifact), ArtifactKind::Video, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::MissingCallback));
    }
}
