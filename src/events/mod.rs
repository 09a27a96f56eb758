//! Events flowing into and out of the session controller
//!
//! Everything asynchronous (engine callbacks, timer ticks, service replies,
//! scheduled delays, UI commands) arrives as an [`Event`] on one channel and
//! is handled one at a time. Observable changes leave as [`StateEvent`]s on a
//! broadcast channel.

use serde::{Deserialize, Serialize};

use crate::service::ServiceReply;
use crate::session::{Speaker, Stage};

/// Inbound event consumed by the controller loop
#[derive(Debug)]
pub enum Event {
    /// User action from the IPC surface
    Command(Command),

    /// Lifecycle or transcript signal from the capture engine
    Capture {
        activation: u64,
        signal: CaptureSignal,
    },

    /// Playback engine finished an utterance
    SpeechEnded { utterance: u64 },

    /// Playback engine failed mid-utterance
    SpeechFailed { utterance: u64, reason: String },

    /// One-second deadline tick
    TimerTick { generation: u64 },

    /// A delayed arbiter action came due
    Scheduled(ScheduledAction),

    /// A service request completed
    ServiceReply { request: u64, reply: ServiceReply },
}

/// User commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartInterview,
    UpdateAnswer { text: String },
    SubmitAnswer,
    ToggleAutoListen,
    /// Single capture attempt while auto-listen is off
    CaptureOnce,
    /// Re-speak an interviewer turn from the transcript log
    ReadAloud { index: usize },
    ReadSummary,
}

/// Signals a capture engine reports for one activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignal {
    Started,
    Transcript(String),
    Ended,
    Error(String),
}

/// Delayed actions owned by the turn arbiter
///
/// Each carries the epoch it was scheduled under; a stale epoch is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    RestartCapture { epoch: u64 },
    NextUtterance { epoch: u64 },
}

/// Events emitted to subscribers as the session changes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    /// Stage transition
    StageChanged { from: Stage, to: Stage },

    /// A turn was appended to the transcript log
    TurnAppended { speaker: Speaker, text: String },

    /// Pending answer text changed
    AnswerUpdated { text: String },

    /// Deadline armed or ticked
    DeadlineTick {
        remaining_seconds: u32,
        total_seconds: u32,
    },

    /// Deadline reached zero
    DeadlineExpired,

    /// Capture engine started or stopped
    ListeningChanged { capturing: bool },

    /// Playback engine started or stopped
    SpeakingChanged { speaking: bool },

    /// Auto-listen intent toggled
    AutoListenChanged { enabled: bool },

    /// User-visible failure
    Alert { message: String },

    /// Interview reached its summary
    InterviewCompleted { summary: String },
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateEvent::StageChanged { from, to } => write!(f, "STAGE_CHANGED ({} -> {})", from, to),
            StateEvent::TurnAppended { speaker, .. } => write!(f, "TURN_APPENDED ({})", speaker),
            StateEvent::AnswerUpdated { text } => write!(f, "ANSWER_UPDATED ({} chars)", text.len()),
            StateEvent::DeadlineTick {
                remaining_seconds,
                total_seconds,
            } => write!(f, "DEADLINE_TICK ({}/{}s)", remaining_seconds, total_seconds),
            StateEvent::DeadlineExpired => write!(f, "DEADLINE_EXPIRED"),
            StateEvent::ListeningChanged { capturing } => write!(f, "LISTENING_CHANGED ({})", capturing),
            StateEvent::SpeakingChanged { speaking } => write!(f, "SPEAKING_CHANGED ({})", speaking),
            StateEvent::AutoListenChanged { enabled } => write!(f, "AUTO_LISTEN_CHANGED ({})", enabled),
            StateEvent::Alert { message } => write!(f, "ALERT ({})", message),
            StateEvent::InterviewCompleted { .. } => write!(f, "INTERVIEW_COMPLETED"),
        }
    }
}
