use intent_vector_store::RankOptions;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_EMBEDDINGS_LOCATION: &str = "build/embeddings.json";
pub const DEFAULT_MODEL_LOCATION: &str = "models/all-MiniLM-L6-v2";

/// Named lock shared by every process booting the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLockConfig {
    pub dir: PathBuf,
    pub session: String,
}

impl SessionLockConfig {
    pub fn new(dir: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            session: session.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub embeddings_location: String,
    pub model_location: String,
    pub version: String,
    /// Delay before the first boot of a session, and after a forced restart.
    pub boot_delay: Duration,
    pub max_attempts: u32,
    /// Retry `n` waits `backoff_base * 2^n`.
    pub backoff_base: Duration,
    pub idle_timeout: Duration,
    pub stuck_after: Duration,
    pub rank: RankOptions,
    pub session_lock: Option<SessionLockConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            embeddings_location: DEFAULT_EMBEDDINGS_LOCATION.to_string(),
            model_location: DEFAULT_MODEL_LOCATION.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            boot_delay: Duration::from_millis(500),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(5 * 60),
            stuck_after: Duration::from_secs(15),
            rank: RankOptions::default(),
            session_lock: None,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let session_lock = env::var("INTENT_SESSION")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|session| {
                let dir = env::var_os("INTENT_LOCK_DIR")
                    .map_or_else(env::temp_dir, PathBuf::from);
                SessionLockConfig::new(dir, session)
            });

        Self {
            embeddings_location: env::var("INTENT_EMBEDDINGS")
                .unwrap_or(defaults.embeddings_location),
            model_location: env::var("INTENT_MODEL_DIR").unwrap_or(defaults.model_location),
            version: env::var("INTENT_ASSET_VERSION").unwrap_or(defaults.version),
            idle_timeout: idle_timeout_from_env().unwrap_or(defaults.idle_timeout),
            session_lock,
            ..defaults
        }
    }

    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(1u32 << attempt.min(16))
    }
}

fn idle_timeout_from_env() -> Option<Duration> {
    env::var("INTENT_IDLE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .map(|d| d.clamp(Duration::from_secs(10), Duration::from_secs(24 * 60 * 60)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let config = PipelineConfig::default();
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.boot_delay, Duration::from_millis(500));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.stuck_after, Duration::from_secs(15));
        assert!(config.session_lock.is_none());
    }
}
