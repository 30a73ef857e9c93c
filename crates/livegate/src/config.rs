use std::path::PathBuf;
use std::time::Duration;

use livegate_core::{ChallengeConfig, SessionConfig};

/// Front-end configuration, loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the JSON user database.
    pub db_path: PathBuf,
    /// Seconds the subject has to complete a challenge.
    pub challenge_secs: f32,
    /// Eye aspect ratio below which a blink is registered.
    pub ear_threshold: f32,
    /// Yaw change (degrees) for look-left/look-right.
    pub yaw_threshold: f32,
    /// Pitch change (degrees) for look-up/look-down.
    pub pitch_threshold: f32,
    /// Mean passive score a session must exceed.
    pub min_passive_score: f32,
    /// Similarity a login match must exceed.
    pub match_threshold: f32,
    /// Wall-clock limit for a whole session, including frames without a face.
    pub result_timeout_secs: u64,
}

impl Config {
    /// Load configuration from `LIVEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("livegate");

        let db_path = var("LIVEGATE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("users.json"));

        // Non-finite values never pass: a NaN threshold would disable its check.
        let parsed = |key: &str| {
            var(key)
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|v| v.is_finite())
        };
        let score = |key: &str| parsed(key).filter(|v| (0.0..=1.0).contains(v));
        let defaults = SessionConfig::default();

        Self {
            db_path,
            challenge_secs: parsed("LIVEGATE_CHALLENGE_SECS")
                .filter(|s| *s > 0.0 && Duration::try_from_secs_f32(*s).is_ok())
                .unwrap_or(defaults.challenge.duration.as_secs_f32()),
            ear_threshold: score("LIVEGATE_EAR_THRESHOLD")
                .unwrap_or(defaults.challenge.ear_threshold),
            yaw_threshold: parsed("LIVEGATE_YAW_THRESHOLD")
                .filter(|deg| (0.0..180.0).contains(deg))
                .unwrap_or(defaults.challenge.yaw_threshold),
            pitch_threshold: parsed("LIVEGATE_PITCH_THRESHOLD")
                .filter(|deg| (0.0..180.0).contains(deg))
                .unwrap_or(defaults.challenge.pitch_threshold),
            min_passive_score: score("LIVEGATE_MIN_PASSIVE_SCORE")
                .unwrap_or(defaults.min_passive_score),
            match_threshold: score("LIVEGATE_MATCH_THRESHOLD")
                .unwrap_or(defaults.match_threshold),
            result_timeout_secs: var("LIVEGATE_RESULT_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(10),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let defaults = SessionConfig::default();
        SessionConfig {
            challenge: ChallengeConfig {
                duration: Duration::try_from_secs_f32(self.challenge_secs)
                    .unwrap_or(defaults.challenge.duration),
                ear_threshold: self.ear_threshold,
                yaw_threshold: self.yaw_threshold,
                pitch_threshold: self.pitch_threshold,
            },
            min_passive_score: self.min_passive_score,
            match_threshold: self.match_threshold,
        }
    }

    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }
}
