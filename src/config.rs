use crate::chat::ChatConfig;
use crate::tts::SpeechConfig;
use crate::vad::VadConfig;
use secrecy::SecretBox;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Minimum spacing between two accepted generation requests.
pub const MIN_SEND_SPACING: Duration = Duration::from_millis(1100);
/// Pause between accepting a spoken transcript and handing it to the send gate.
pub const TRANSCRIPT_SAFETY_DELAY: Duration = Duration::from_millis(350);
/// Debounce before re-arming recognition after a session ends while listening.
pub const RECOGNITION_RESTART_DEBOUNCE: Duration = Duration::from_millis(250);
/// Time given to buffered speech audio to drain after a barge-in.
pub const BARGE_IN_CLEARANCE: Duration = Duration::from_millis(600);
/// Quiet period after the assistant finishes speaking before listening again.
pub const POST_SPEECH_QUIET_PERIOD: Duration = Duration::from_millis(5000);
/// Replies longer than this many words are truncated.
pub const MAX_REPLY_WORDS: usize = 100;

pub const DEFAULT_CHAT_BASE_URL: &str = "http://127.0.0.1:3000";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue { var: String, reason: String },
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Delays that pace the turn-taking cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub min_send_spacing: Duration,
    pub transcript_delay: Duration,
    pub restart_debounce: Duration,
    pub barge_in_clearance: Duration,
    pub quiet_period: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_send_spacing: MIN_SEND_SPACING,
            transcript_delay: TRANSCRIPT_SAFETY_DELAY,
            restart_debounce: RECOGNITION_RESTART_DEBOUNCE,
            barge_in_clearance: BARGE_IN_CLEARANCE,
            quiet_period: POST_SPEECH_QUIET_PERIOD,
        }
    }
}

/// Everything a conversation session needs, loaded from the environment.
#[derive(Debug)]
pub struct SessionConfig {
    pub chat: ChatConfig,
    pub speech: SpeechConfig,
    pub vad: VadConfig,
    pub timing: TimingConfig,
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let base = env::var("CHAT_BASE_URL").unwrap_or_else(|_| DEFAULT_CHAT_BASE_URL.to_string());
        let mut chat = ChatConfig::new(Url::parse(&base)?);
        chat.api_token = Self::load_token("CHAT_API_TOKEN")?;
        chat.timeout = Duration::from_secs(Self::parse_var("CHAT_TIMEOUT_SECS", 60u64)?);

        let mut speech = SpeechConfig::default();
        speech.enabled = Self::parse_bool("SPEECH_ENABLED", speech.enabled)?;
        speech.rate = Self::parse_var("SPEECH_RATE", speech.rate)?;
        if let Ok(language) = env::var("SPEECH_LANGUAGE") {
            speech.language = language;
        }
        if let Ok(voice) = env::var("SPEECH_VOICE") {
            speech.preferred_voice = voice;
        }

        let mut vad = VadConfig::default();
        vad.threshold = Self::parse_var("VAD_THRESHOLD", vad.threshold)?;

        let config = Self {
            chat,
            speech,
            vad,
            timing: TimingConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that the environment parser cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::validate_rate(self.speech.rate)?;
        Self::validate_threshold(self.vad.threshold)?;
        if self.speech.language.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "SPEECH_LANGUAGE".to_string(),
                reason: "language tag cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    fn validate_rate(rate: f32) -> Result<(), ConfigError> {
        if !(0.1..=10.0).contains(&rate) {
            return Err(ConfigError::InvalidValue {
                var: "SPEECH_RATE".to_string(),
                reason: format!("{} is outside 0.1..=10.0", rate),
            });
        }
        Ok(())
    }

    fn validate_threshold(threshold: f32) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                var: "VAD_THRESHOLD".to_string(),
                reason: format!("{} is outside 0.0..=1.0", threshold),
            });
        }
        Ok(())
    }

    fn load_token(var: &str) -> Result<Option<SecretBox<String>>, ConfigError> {
        match env::var(var) {
            Ok(token) if token.trim().is_empty() => Err(ConfigError::InvalidValue {
                var: var.to_string(),
                reason: "token cannot be empty when set".to_string(),
            }),
            Ok(token) => Ok(Some(SecretBox::new(Box::new(token)))),
            Err(_) => Ok(None),
        }
    }

    fn parse_var<T>(var: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(var) {
            Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                var: var.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Ok(default),
        }
    }

    fn parse_bool(var: &str, default: bool) -> Result<bool, ConfigError> {
        match env::var(var) {
            Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(ConfigError::InvalidValue {
                    var: var.to_string(),
                    reason: format!("'{}' is not a boolean", other),
                }),
            },
            Err(_) => Ok(default),
        }
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<SessionConfig, ConfigError> {
    match SessionConfig::load() {
        Ok(config) => {
            log::info!(
                "Loaded session configuration (endpoint: {})",
                config.chat.base_url
            );
            Ok(config)
        }
        Err(ConfigError::InvalidValue { var, reason }) => {
            log::error!("Invalid value for {}: {}", var, reason);
            log::error!("Fix it in your environment or the .env file in the project root");
            Err(ConfigError::InvalidValue { var, reason })
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "CHAT_BASE_URL",
        "CHAT_API_TOKEN",
        "CHAT_TIMEOUT_SECS",
        "SPEECH_ENABLED",
        "SPEECH_RATE",
        "SPEECH_LANGUAGE",
        "SPEECH_VOICE",
        "VAD_THRESHOLD",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_timing_defaults() {
        let timing = TimingConfig::default();
        assert_eq!(timing.min_send_spacing, Duration::from_millis(1100));
        assert_eq!(timing.transcript_delay, Duration::from_millis(350));
        assert_eq!(timing.restart_debounce, Duration::from_millis(250));
        assert_eq!(timing.barge_in_clearance, Duration::from_millis(600));
        assert_eq!(timing.quiet_period, Duration::from_millis(5000));
    }

    #[test]
    #[serial]
    fn test_load_defaults() {
        clear_env();
        let config = SessionConfig::load().unwrap();
        assert_eq!(config.chat.base_url.as_str(), "http://127.0.0.1:3000/");
        assert!(config.chat.api_token.is_none());
        assert_eq!(config.chat.timeout, Duration::from_secs(60));
        assert!(config.speech.enabled);
        assert_eq!(config.speech.rate, 1.0);
        assert_eq!(config.speech.language, "en-US");
        assert_eq!(config.vad.threshold, 0.06);
    }

    #[test]
    #[serial]
    fn test_load_overrides() {
        clear_env();
        env::set_var("CHAT_BASE_URL", "https://chat.example.com");
        env::set_var("CHAT_API_TOKEN", "secret-token");
        env::set_var("SPEECH_ENABLED", "off");
        env::set_var("SPEECH_RATE", "1.5");
        env::set_var("SPEECH_LANGUAGE", "en-GB");
        env::set_var("VAD_THRESHOLD", "0.1");

        let config = SessionConfig::load().unwrap();
        clear_env();

        assert_eq!(config.chat.base_url.host_str(), Some("chat.example.com"));
        assert!(config.chat.api_token.is_some());
        assert!(!config.speech.enabled);
        assert_eq!(config.speech.rate, 1.5);
        assert_eq!(config.speech.language, "en-GB");
        assert_eq!(config.vad.threshold, 0.1);
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        env::set_var("SPEECH_RATE", "fast");
        assert!(matches!(
            SessionConfig::load(),
            Err(ConfigError::InvalidValue { ref var, .. }) if var == "SPEECH_RATE"
        ));

        env::set_var("SPEECH_RATE", "20");
        assert!(SessionConfig::load().is_err());
        env::remove_var("SPEECH_RATE");

        env::set_var("VAD_THRESHOLD", "1.5");
        assert!(SessionConfig::load().is_err());
        env::remove_var("VAD_THRESHOLD");

        env::set_var("CHAT_API_TOKEN", "  ");
        assert!(SessionConfig::load().is_err());
        env::remove_var("CHAT_API_TOKEN");

        env::set_var("CHAT_BASE_URL", "not a url");
        assert!(matches!(
            SessionConfig::load(),
            Err(ConfigError::InvalidUrl(_))
        ));
        clear_env();
    }
}
