//! Configuration management for bugcast

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session behaviour (audio, file names, teardown)
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Screen capture backend configuration
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Where downloaded artifacts go
    #[serde(default)]
    pub output: OutputConfig,

    /// Upload configuration
    #[serde(default)]
    pub upload: UploadConfig,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Whether to record the microphone alongside the screen
    #[serde(default)]
    pub audio_enabled: bool,

    /// Custom name for the network log (extension is appended)
    pub network_file_name: Option<String>,

    /// Custom name for the screen recording (extension is appended)
    pub video_file_name: Option<String>,

    /// Tear the session down once artifacts are downloaded
    #[serde(default)]
    pub close_after_download: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// ffmpeg executable used by the screen recorder
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Capture frame rate
    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// Display to capture (X11 display on Linux, screen index on macOS)
    pub display: Option<String>,

    /// Microphone device name (required for dshow on Windows)
    pub microphone_device: Option<String>,

    /// Directory for preview files (system temp dir when unset)
    pub preview_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory where downloaded artifacts are written
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Endpoint receiving multipart uploads
    pub upload_url: Option<String>,

    /// Request timeout for uploads
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_framerate() -> u32 {
    30
}

fn default_upload_timeout() -> u64 {
    60
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            framerate: default_framerate(),
            display: None,
            microphone_device: None,
            preview_dir: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            upload_url: None,
            timeout_secs: default_upload_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific file, creating it with defaults if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

            let mut config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

            config.config_path = Some(config_path.to_path_buf());
            Ok(config)
        } else {
            let config = Config {
                config_path: Some(config_path.to_path_buf()),
                ..Config::default()
            };
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = match &self.config_path {
            Some(path) => path.clone(),
            None => Self::default_config_path()?,
        };

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path, if known
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "bugcast", "agent")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Directory where downloads are written
    ///
    /// Falls back to the user's download directory, then the working directory.
    pub fn download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output.download_dir {
            return dir.clone();
        }

        directories::UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory where preview files are created
    pub fn preview_dir(&self) -> PathBuf {
        self.capture
            .preview_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Generate a session ID
    pub fn new_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();

        assert!(path.exists());
        assert!(!config.recording.audio_enabled);
        assert_eq!(config.capture.framerate, 30);
        assert_eq!(config.upload.timeout_secs, 60);
        assert_eq!(config.config_path(), Some(path.as_path()));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[recording]\naudio_enabled = true\nvideo_file_name = \"repro\"\n\n[upload]\nupload_url = \"https://bugs.example.com\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();

        assert!(config.recording.audio_enabled);
        assert_eq!(config.recording.video_file_name.as_deref(), Some("repro"));
        assert_eq!(config.recording.network_file_name, None);
        assert_eq!(config.capture.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(
            config.upload.upload_url.as_deref(),
            Some("https://bugs.example.com")
        );
    }

    #[test]
    fn test_download_dir_override() {
        let mut config = Config::default();
        config.output.download_dir = Some(PathBuf::from("/tmp/bugcast-out"));

        assert_eq!(config.download_dir(), PathBuf::from("/tmp/bugcast-out"));
    }
}
