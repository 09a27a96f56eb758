//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    /// Base URL of the interview service, without trailing slash
    pub service_url: String,

    /// Per-request timeout for service calls
    pub request_timeout: Duration,

    /// Speech-to-text command; first stdout line is the transcript
    pub capture_command: Option<String>,

    /// Text-to-speech command (espeak-ng compatible flags)
    pub speech_command: Option<String>,

    /// Voice tuning for the controller and arbiter
    pub voice: VoiceConfig,
}

/// Timing and policy knobs for the voice channel
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Language tag prefix voices must match (e.g. "en")
    pub language: String,

    /// Whether auto-listen starts enabled for a new interview
    pub auto_listen: bool,

    /// Pause before re-arming capture
    pub settle_delay: Duration,

    /// Pause between chained interviewer utterances
    pub utterance_gap: Duration,

    /// Consecutive capture errors tolerated before auto-restart pauses
    pub max_capture_errors: u32,

    /// Number of questions the service plans to ask
    pub planned_questions: usize,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            auto_listen: true,
            settle_delay: Duration::from_millis(1000),
            utterance_gap: Duration::from_millis(600),
            max_capture_errors: 3,
            planned_questions: 6,
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        // A missing .env is the normal case
        let _ = dotenvy::dotenv();

        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home)
            .join(".local")
            .join("share")
            .join("interview-daemon");

        let socket_path = match std::env::var("INTERVIEW_SOCKET") {
            Ok(path) => PathBuf::from(path),
            Err(_) => data_dir.join("daemon.sock"),
        };

        let service_url = std::env::var("INTERVIEW_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8000/api".to_string())
            .trim_end_matches('/')
            .to_string();

        let request_timeout = Duration::from_secs(env_parse("INTERVIEW_REQUEST_TIMEOUT_SECS", 30)?);

        let defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            language: std::env::var("INTERVIEW_LANGUAGE").unwrap_or(defaults.language),
            auto_listen: env_parse("INTERVIEW_AUTO_LISTEN", defaults.auto_listen)?,
            settle_delay: Duration::from_millis(env_parse(
                "INTERVIEW_SETTLE_DELAY_MS",
                defaults.settle_delay.as_millis() as u64,
            )?),
            utterance_gap: Duration::from_millis(env_parse(
                "INTERVIEW_UTTERANCE_GAP_MS",
                defaults.utterance_gap.as_millis() as u64,
            )?),
            max_capture_errors: env_parse("INTERVIEW_MAX_CAPTURE_ERRORS", defaults.max_capture_errors)?,
            planned_questions: env_parse("INTERVIEW_QUESTIONS", defaults.planned_questions)?,
        };

        Ok(Self {
            socket_path,
            data_dir,
            service_url,
            request_timeout,
            capture_command: non_empty_var("INTERVIEW_CAPTURE_CMD"),
            // Set but empty disables playback
            speech_command: match std::env::var("INTERVIEW_SPEECH_CMD") {
                Ok(cmd) => Some(cmd).filter(|c| !c.trim().is_empty()),
                Err(_) => Some("espeak-ng".to_string()),
            },
            voice,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
