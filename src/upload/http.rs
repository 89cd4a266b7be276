//! Default upload transport: POST the multipart payload to a URL

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;
use crate::error::RecorderError;

use super::{MultipartPayload, UploadCallback};

/// Posts artifacts to a fixed URL.
///
/// Transport failures are logged and reported as `Ok(false)` rather than
/// propagated, so a failed upload never takes the session down with it.
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    upload_url: String,
}

impl HttpUploader {
    /// Create an uploader for the given URL
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            upload_url: upload_url.into(),
        }
    }

    /// Create an uploader from the upload section of the config, if a URL is set
    pub fn from_config(config: &Config) -> Option<Self> {
        let upload_url = config.upload.upload_url.clone()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.upload.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                error!("Failed to build upload client ({}), using defaults", e);
                Client::new()
            });

        Some(Self { client, upload_url })
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    async fn post(&self, payload: MultipartPayload) -> Result<(), RecorderError> {
        let form = payload
            .into_form()
            .map_err(|e| RecorderError::Transport(e.to_string()))?;

        self.client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RecorderError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| RecorderError::Transport(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl UploadCallback for HttpUploader {
    type Output = bool;

    async fn upload(&self, payload: MultipartPayload) -> anyhow::Result<bool> {
        let file_name = payload.file_name.clone();

        match self.post(payload).await {
            Ok(()) => {
                info!("Uploaded {} to {}", file_name, self.upload_url);
                Ok(true)
            }
            Err(e) => {
                error!("Error uploading {}: {}", file_name, e);
                Ok(false)
            }
        }
    }
}
