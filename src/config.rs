//! Configuration types for gallery-dl-core

use crate::error::{Error, Result};
use crate::profile::{PerformanceProfile, ProfileMode};
use crate::types::ConversionFormat;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Download behavior configuration (directories, retries, supervision)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "downloads")
    ///
    /// Each gallery lands in a subdirectory named `"{title} [{id}]"`.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Retry policy for failed page fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// How long a page transfer may go without any output before it is
    /// declared unresponsive (default: 60 seconds)
    #[serde(default = "default_silence_timeout", with = "duration_serde")]
    pub silence_timeout: Duration,

    /// Minimum spacing between progress snapshots (default: 200ms)
    #[serde(default = "default_progress_interval", with = "duration_ms_serde")]
    pub progress_interval: Duration,

    /// Number of byte samples averaged for speed (default: 10)
    #[serde(default = "default_speed_window")]
    pub speed_window: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            retry: RetryConfig::default(),
            silence_timeout: default_silence_timeout(),
            progress_interval: default_progress_interval(),
            speed_window: default_speed_window(),
        }
    }
}

/// Performance profile selection and preset overrides
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Profile active at startup (default: normal)
    #[serde(default)]
    pub mode: ProfileMode,

    /// Limits used by the normal preset
    #[serde(default = "PerformanceProfile::normal")]
    pub normal: PerformanceProfile,

    /// Limits used by the turbo preset
    #[serde(default = "PerformanceProfile::turbo")]
    pub turbo: PerformanceProfile,

    /// Limits used when `mode` is `custom`
    #[serde(default)]
    pub custom: Option<PerformanceProfile>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            mode: ProfileMode::Normal,
            normal: PerformanceProfile::normal(),
            turbo: PerformanceProfile::turbo(),
            custom: None,
        }
    }
}

impl PerformanceConfig {
    /// Profile selected by `mode`
    ///
    /// A `custom` mode without custom limits falls back to the normal preset.
    pub fn initial_profile(&self) -> PerformanceProfile {
        match self.mode {
            ProfileMode::Normal => self.normal.clone(),
            ProfileMode::Turbo => self.turbo.clone(),
            ProfileMode::Custom => self.custom.clone().unwrap_or_else(|| self.normal.clone()),
        }
    }

    /// Preset for a named mode
    pub fn preset(&self, mode: ProfileMode) -> PerformanceProfile {
        match mode {
            ProfileMode::Turbo => self.turbo.clone(),
            ProfileMode::Normal | ProfileMode::Custom => self.normal.clone(),
        }
    }
}

/// Transfer engine (aria2c) settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the aria2c executable (auto-detected if None)
    #[serde(default)]
    pub aria2_path: Option<PathBuf>,

    /// Whether to search PATH for aria2c if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// Per-request network timeout passed to the engine (default: 10 seconds)
    #[serde(default = "default_engine_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Connect timeout passed to the engine (default: 10 seconds)
    #[serde(default = "default_engine_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aria2_path: None,
            search_path: true,
            timeout: default_engine_timeout(),
            connect_timeout: default_engine_timeout(),
        }
    }
}

/// Post-download conversion defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Convert every successfully downloaded gallery (default: false)
    #[serde(default)]
    pub auto_convert: bool,

    /// Format used by auto-convert and directory conversion (default: archive_bundle)
    #[serde(default)]
    pub default_format: ConversionFormat,

    /// Remove page files after a verified conversion (default: false)
    #[serde(default)]
    pub delete_source: bool,

    /// Encoder quality, 1-100 (default: 100)
    #[serde(default = "default_quality")]
    pub quality: u8,

    /// Replace an existing output file (default: false)
    #[serde(default)]
    pub overwrite: bool,

    /// Path to the ImageMagick executable used for documents (auto-detected if None)
    #[serde(default)]
    pub magick_path: Option<PathBuf>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            auto_convert: false,
            default_format: ConversionFormat::default(),
            delete_source: false,
            quality: default_quality(),
            overwrite: false,
            magick_path: None,
        }
    }
}

/// History persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "gallery-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Record finished jobs in the history store (default: true)
    #[serde(default = "default_true")]
    pub enable_history: bool,

    /// Oldest records beyond this count are pruned after each write (default: 10000)
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: Option<usize>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            enable_history: true,
            max_history_entries: default_max_history_entries(),
        }
    }
}

/// Main configuration for GalleryDownloader
///
/// - [`download`](DownloadConfig): directories, retries, supervision
/// - [`performance`](PerformanceConfig): concurrency presets
/// - [`engine`](EngineConfig): aria2c location and timeouts
/// - [`conversion`](ConversionConfig): post-download conversion defaults
/// - [`persistence`](PersistenceConfig): history database
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Performance profile presets
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Transfer engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Conversion defaults
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// History persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse and validate a JSON configuration
    ///
    /// Missing sections and fields take their defaults, so `{}` is a valid
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] for malformed JSON and
    /// [`Error::Config`] when a value fails validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be read, otherwise as
    /// [`from_json`](Self::from_json).
    pub async fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await?;
        let config = Self::from_json(&json)?;
        tracing::debug!(path = ?path, "Configuration loaded");
        Ok(config)
    }

    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Check settings that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        self.performance.normal.validate()?;
        self.performance.turbo.validate()?;
        if let Some(custom) = &self.performance.custom {
            custom.validate()?;
        }

        let multiplier = self.download.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(Error::Config {
                message: format!(
                    "backoff_multiplier must be a finite number >= 1.0, got {multiplier}"
                ),
                key: Some("backoff_multiplier".to_string()),
            });
        }

        if self.download.speed_window == 0 {
            return Err(Error::Config {
                message: "speed_window must be at least 1".to_string(),
                key: Some("speed_window".to_string()),
            });
        }

        if self.download.progress_interval.is_zero() {
            return Err(Error::Config {
                message: "progress_interval must be greater than zero".to_string(),
                key: Some("progress_interval".to_string()),
            });
        }

        if self.download.silence_timeout.is_zero() {
            return Err(Error::Config {
                message: "silence_timeout must be greater than zero".to_string(),
                key: Some("silence_timeout".to_string()),
            });
        }

        Ok(())
    }
}

/// Retry configuration for transient page failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("gallery-dl.db")
}

fn default_true() -> bool {
    true
}

fn default_silence_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_progress_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_speed_window() -> usize {
    10
}

fn default_engine_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_quality() -> u8 {
    100
}

fn default_max_history_entries() -> Option<usize> {
    Some(10_000)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
pub(crate) mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_documented_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.download.download_dir, PathBuf::from("downloads"));
        assert_eq!(config.download.retry.max_attempts, 3);
        assert_eq!(config.download.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.download.retry.max_delay, Duration::from_secs(30));
        assert!(!config.download.retry.jitter);
        assert_eq!(config.download.silence_timeout, Duration::from_secs(60));
        assert_eq!(config.download.progress_interval, Duration::from_millis(200));
        assert_eq!(config.download.speed_window, 10);

        assert_eq!(config.performance.mode, ProfileMode::Normal);
        assert_eq!(
            config.performance.initial_profile(),
            PerformanceProfile::normal()
        );

        assert!(config.engine.search_path);
        assert_eq!(config.engine.timeout, Duration::from_secs(10));

        assert!(!config.conversion.auto_convert);
        assert_eq!(
            config.conversion.default_format,
            ConversionFormat::ArchiveBundle
        );
        assert_eq!(config.conversion.quality, 100);

        assert_eq!(
            config.persistence.database_path,
            PathBuf::from("gallery-dl.db")
        );
        assert!(config.persistence.enable_history);
        assert_eq!(config.persistence.max_history_entries, Some(10_000));
    }

    #[test]
    fn default_impl_matches_serde_defaults() {
        let from_json: Config = serde_json::from_str("{}").unwrap();
        let from_default = Config::default();

        assert_eq!(
            serde_json::to_value(&from_json).unwrap(),
            serde_json::to_value(&from_default).unwrap()
        );
    }

    #[test]
    fn turbo_mode_selects_turbo_preset() {
        let config: Config =
            serde_json::from_str(r#"{"performance": {"mode": "turbo"}}"#).unwrap();
        assert_eq!(
            config.performance.initial_profile(),
            PerformanceProfile::turbo()
        );
    }

    #[test]
    fn custom_mode_without_limits_falls_back_to_normal() {
        let config: Config =
            serde_json::from_str(r#"{"performance": {"mode": "custom"}}"#).unwrap();
        assert_eq!(
            config.performance.initial_profile(),
            PerformanceProfile::normal()
        );
    }

    #[test]
    fn durations_use_seconds_and_milliseconds() {
        let config: Config = serde_json::from_str(
            r#"{"download": {"silence_timeout": 5, "progress_interval": 50, "retry": {"initial_delay": 2}}}"#,
        )
        .unwrap();

        assert_eq!(config.download.silence_timeout, Duration::from_secs(5));
        assert_eq!(config.download.progress_interval, Duration::from_millis(50));
        assert_eq!(config.download.retry.initial_delay, Duration::from_secs(2));
    }

    #[test]
    fn validate_rejects_zero_speed_window() {
        let mut config = Config::default();
        config.download.speed_window = 0;

        match config.validate() {
            Err(Error::Config { key, .. }) => assert_eq!(key.as_deref(), Some("speed_window")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_zero_gallery_cap_in_presets() {
        let mut config = Config::default();
        config.performance.turbo.max_parallel_galleries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_json_validates() {
        let err = Config::from_json(r#"{"download": {"speed_window": 0}}"#).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let err = Config::from_json("{ not json").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn backoff_multiplier_below_one_is_rejected() {
        for multiplier in ["-2.0", "0.5"] {
            let json =
                format!(r#"{{"download": {{"retry": {{"backoff_multiplier": {multiplier}}}}}}}"#);
            let err = Config::from_json(&json).unwrap_err();
            assert!(
                matches!(&err, Error::Config { key: Some(key), .. } if key == "backoff_multiplier"),
                "{multiplier}: {err:?}"
            );
        }

        let mut config = Config::default();
        config.download.retry.backoff_multiplier = f64::NAN;
        assert!(config.validate().is_err());

        config.download.retry.backoff_multiplier = 1.0;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn load_reads_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"download": {"download_dir": "/srv/galleries"}}"#).unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.download_dir(), &PathBuf::from("/srv/galleries"));

        let missing = Config::load(dir.path().join("absent.json")).await;
        assert!(matches!(missing, Err(Error::Io(_))));
    }
}
