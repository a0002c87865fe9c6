use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::extractors::AudioFormat;
use crate::utils;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Where audio files and metadata live
    pub storage: StorageConfig,

    /// External extraction tool settings
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to
    pub listen_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the produced audio files
    pub download_dir: PathBuf,

    /// Metadata backend
    pub backend: StoreBackend,

    /// JSON metadata file (json backend)
    pub metadata_file: PathBuf,

    /// SQLite database file (sqlite backend)
    pub database_path: PathBuf,

    /// How titles become filenames
    pub naming: FileNaming,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// yt-dlp executable, a bare name is looked up in PATH
    pub yt_dlp_path: PathBuf,

    /// ffmpeg binary or directory; PATH is searched when unset
    pub ffmpeg_location: Option<PathBuf>,

    /// Target audio codec
    pub audio_format: AudioFormat,

    /// Target bitrate passed to the transcoder
    pub audio_quality: String,

    /// Abort a conversion after this many seconds
    pub timeout_secs: Option<u64>,

    /// Maximum concurrent conversions
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileNaming {
    /// Keep the title, minus reserved characters
    #[default]
    Title,
    /// Underscores for whitespace, reserved characters removed
    Sanitized,
}

impl FileNaming {
    /// Turn a title into a filename stem
    pub fn apply(&self, title: &str) -> String {
        match self {
            FileNaming::Title => utils::strip_reserved(title),
            FileNaming::Sanitized => utils::strip_reserved(&utils::sanitize_filename(title)),
        }
    }
}

/// External binaries resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    pub ffmpeg: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            backend: StoreBackend::Json,
            metadata_file: PathBuf::from("songs_metadata.json"),
            database_path: PathBuf::from("songs.db"),
            naming: FileNaming::Title,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: PathBuf::from("yt-dlp"),
            ffmpeg_location: None,
            audio_format: AudioFormat::Mp3,
            audio_quality: "192K".to_string(),
            timeout_secs: None,
            max_concurrent_jobs: 3,
        }
    }
}

impl Config {
    /// Load configuration from an explicit file, the working directory, or
    /// the user config directory (written with defaults when missing)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            Self::from_file(&config_path)
        } else if explicit.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            let config = Self::default();
            config.save(&config_path)?;
            tracing::info!("Wrote default configuration to {}", config_path.display());
            Ok(config)
        }
    }

    /// Parse and validate a YAML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs_err::read_to_string(path).context("Failed to read config file")?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs_err::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        fs_err::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Get configuration file path
    pub fn config_path() -> Result<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("mp3tube").join("config.yaml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.trim().is_empty() {
            anyhow::bail!("server.listen_addr must not be empty");
        }
        if self.storage.download_dir.as_os_str().is_empty() {
            anyhow::bail!("storage.download_dir must not be empty");
        }
        match self.storage.backend {
            StoreBackend::Json if self.storage.metadata_file.as_os_str().is_empty() => {
                anyhow::bail!("storage.metadata_file must be set for the json backend");
            }
            StoreBackend::Sqlite if self.storage.database_path.as_os_str().is_empty() => {
                anyhow::bail!("storage.database_path must be set for the sqlite backend");
            }
            _ => {}
        }
        if self.extractor.yt_dlp_path.as_os_str().is_empty() {
            anyhow::bail!("extractor.yt_dlp_path must not be empty");
        }
        if self.extractor.audio_quality.trim().is_empty() {
            anyhow::bail!("extractor.audio_quality must not be empty");
        }
        if self.extractor.max_concurrent_jobs == 0 {
            anyhow::bail!("extractor.max_concurrent_jobs must be at least 1");
        }
        if self.extractor.timeout_secs == Some(0) {
            anyhow::bail!("extractor.timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Create the storage directory if it does not exist yet
    pub fn ensure_storage_dir(&self) -> Result<()> {
        let dir = &self.storage.download_dir;
        if !dir.exists() {
            fs_err::create_dir_all(dir).context("Failed to create download folder")?;
            tracing::debug!("Created download folder: {}", dir.display());
        }
        Ok(())
    }

    /// Conversion deadline, if any
    pub fn extraction_timeout(&self) -> Option<std::time::Duration> {
        self.extractor
            .timeout_secs
            .map(std::time::Duration::from_secs)
    }

    /// Resolve yt-dlp and ffmpeg, failing when either cannot be run
    pub async fn resolve_tools(&self) -> Result<ToolPaths> {
        let yt_dlp = self.extractor.yt_dlp_path.clone();
        if !utils::check_command_available(&yt_dlp, "--version").await {
            anyhow::bail!(
                "yt-dlp is not available at '{}'. Please install it: https://github.com/yt-dlp/yt-dlp",
                yt_dlp.display()
            );
        }

        let ffmpeg = match &self.extractor.ffmpeg_location {
            Some(location) => {
                if !location.exists() {
                    anyhow::bail!(
                        "ffmpeg not found at configured location: {}",
                        location.display()
                    );
                }
                location.clone()
            }
            None => utils::find_in_path("ffmpeg").context(
                "ffmpeg was not found in PATH; install it or set extractor.ffmpeg_location",
            )?,
        };
        tracing::info!("Using {} and ffmpeg at {}", yt_dlp.display(), ffmpeg.display());

        Ok(ToolPaths {
            yt_dlp,
            ffmpeg: Some(ffmpeg),
        })
    }

    /// Display current configuration
    pub fn display(&self) {
        println!("Current Configuration:");
        println!("  Listen Address: {}", self.server.listen_addr);
        println!("  Download Folder: {}", self.storage.download_dir.display());
        match self.storage.backend {
            StoreBackend::Json => {
                println!("  Metadata: json ({})", self.storage.metadata_file.display())
            }
            StoreBackend::Sqlite => {
                println!("  Metadata: sqlite ({})", self.storage.database_path.display())
            }
        }
        println!("  File Naming: {:?}", self.storage.naming);
        println!("  yt-dlp: {}", self.extractor.yt_dlp_path.display());
        match &self.extractor.ffmpeg_location {
            Some(location) => println!("  ffmpeg: {}", location.display()),
            None => println!("  ffmpeg: (search PATH)"),
        }
        println!(
            "  Audio: {} @ {}",
            self.extractor.audio_format, self.extractor.audio_quality
        );
        if let Some(secs) = self.extractor.timeout_secs {
            println!("  Timeout: {}s", secs);
        }
        println!("  Max Concurrent Jobs: {}", self.extractor.max_concurrent_jobs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.extractor.audio_format, AudioFormat::Mp3);
        assert_eq!(config.extractor.audio_quality, "192K");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "storage:\n  backend: sqlite\n  naming: sanitized\nextractor:\n  timeout_secs: 600\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.storage.backend, StoreBackend::Sqlite);
        assert_eq!(config.storage.naming, FileNaming::Sanitized);
        assert_eq!(config.storage.database_path, PathBuf::from("songs.db"));
        assert_eq!(config.server.listen_addr, "127.0.0.1:8000");
        assert_eq!(
            config.extraction_timeout(),
            Some(std::time::Duration::from_secs(600))
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.extractor.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.extractor.timeout_secs = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.storage.download_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.server.listen_addr = "0.0.0.0:9000".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.server.listen_addr, "0.0.0.0:9000");
    }

    #[test]
    fn test_explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("missing.yaml"))).is_err());
    }

    #[test]
    fn test_file_naming() {
        assert_eq!(FileNaming::Title.apply("My Song"), "My Song");
        assert_eq!(FileNaming::Sanitized.apply("My Song"), "My_Song");
        assert_eq!(FileNaming::Title.apply("a/b: c?"), "ab c");
    }

    #[test]
    fn test_ensure_storage_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.download_dir = dir.path().join("downloads");

        config.ensure_storage_dir().unwrap();
        assert!(config.storage.download_dir.is_dir());
    }

    #[tokio::test]
    async fn test_resolve_tools_missing_yt_dlp() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.extractor.yt_dlp_path = dir.path().join("no-such-binary");

        let err = config.resolve_tools().await.unwrap_err();
        assert!(err.to_string().contains("yt-dlp is not available"));
    }
}
