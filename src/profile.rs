//! Performance profiles (normal/turbo presets)
//!
//! A [`PerformanceProfile`] is an immutable bundle of concurrency limits. The
//! downloader holds the *current* profile and hands a copy to every job when it
//! is admitted; switching profiles replaces the current value wholesale and
//! never reaches into jobs that are already fetching.

use crate::config::duration_ms_serde;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Concurrency limits for the scheduler and transfer engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    /// Maximum galleries fetching at the same time
    pub max_parallel_galleries: usize,

    /// Maximum simultaneous connections to a single host, shared by all galleries
    pub max_connections_per_server: usize,

    /// Maximum page transfers in flight for one gallery
    pub max_concurrent_downloads: usize,

    /// Minimum spacing between request starts for one gallery (milliseconds)
    #[serde(with = "duration_ms_serde")]
    pub request_delay: Duration,
}

impl PerformanceProfile {
    /// Conservative preset suitable for most sites
    pub fn normal() -> Self {
        Self {
            max_parallel_galleries: 2,
            max_connections_per_server: 4,
            max_concurrent_downloads: 8,
            request_delay: Duration::from_millis(100),
        }
    }

    /// Aggressive preset for fast connections
    pub fn turbo() -> Self {
        Self {
            max_parallel_galleries: 4,
            max_connections_per_server: 16,
            max_concurrent_downloads: 32,
            request_delay: Duration::from_millis(50),
        }
    }

    /// Whether these limits are in turbo territory
    ///
    /// Custom profiles count as turbo once they run at least four galleries
    /// with at least eight connections per server.
    pub fn is_turbo(&self) -> bool {
        self.max_parallel_galleries >= 4 && self.max_connections_per_server >= 8
    }

    /// Reject profiles that would stall the scheduler
    pub fn validate(&self) -> Result<()> {
        let zero_field = if self.max_parallel_galleries == 0 {
            Some("max_parallel_galleries")
        } else if self.max_connections_per_server == 0 {
            Some("max_connections_per_server")
        } else if self.max_concurrent_downloads == 0 {
            Some("max_concurrent_downloads")
        } else {
            None
        };

        match zero_field {
            Some(key) => Err(Error::Config {
                message: format!("{key} must be at least 1"),
                key: Some(key.to_string()),
            }),
            None => Ok(()),
        }
    }
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self::normal()
    }
}

/// Named profile selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileMode {
    /// The normal preset
    #[default]
    Normal,
    /// The turbo preset
    Turbo,
    /// Caller-supplied limits matching neither preset
    Custom,
}

impl ProfileMode {
    /// Classify a profile against the configured presets
    pub fn classify(
        profile: &PerformanceProfile,
        normal: &PerformanceProfile,
        turbo: &PerformanceProfile,
    ) -> Self {
        if profile == turbo {
            ProfileMode::Turbo
        } else if profile == normal {
            ProfileMode::Normal
        } else {
            ProfileMode::Custom
        }
    }
}

/// Snapshot of the active profile, as reported by `profile_status`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileStatus {
    /// Which preset (if any) is active
    pub mode: ProfileMode,
    /// The active limits
    pub profile: PerformanceProfile,
    /// Whether the active limits qualify as turbo
    pub is_turbo: bool,
}
