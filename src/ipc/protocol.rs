//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::{Command, StateEvent};
use crate::session::SessionSnapshot;

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status and session snapshot
    GetStatus,

    /// Subscribe to state change notifications
    Subscribe,

    StartInterview,

    /// Replace the pending answer with typed text
    UpdateAnswer { text: String },

    SubmitAnswer,

    ToggleAutoListen,

    /// One capture attempt with auto-listen off
    CaptureOnce,

    /// Speak an interviewer turn again
    ReadAloud { index: usize },

    ReadSummary,
}

impl Request {
    /// Session command carried by this request, if any
    pub fn into_command(self) -> Option<Command> {
        match self {
            Request::Ping | Request::GetStatus | Request::Subscribe => None,
            Request::StartInterview => Some(Command::StartInterview),
            Request::UpdateAnswer { text } => Some(Command::UpdateAnswer { text }),
            Request::SubmitAnswer => Some(Command::SubmitAnswer),
            Request::ToggleAutoListen => Some(Command::ToggleAutoListen),
            Request::CaptureOnce => Some(Command::CaptureOnce),
            Request::ReadAloud { index } => Some(Command::ReadAloud { index }),
            Request::ReadSummary => Some(Command::ReadSummary),
        }
    }
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Command queued for the session controller
    Accepted,

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Session event occurred
    Event { event: StateEvent },

    /// Some events were dropped because the client fell behind
    Lagged { skipped: u64 },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub session: SessionSnapshot,
}

impl DaemonStatus {
    pub fn new(uptime_secs: u64, session: SessionSnapshot) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs,
            session,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Stage;

    #[test]
    fn test_request_serialization() {
        let req = Request::UpdateAnswer {
            text: "=SUM(A1:A10)".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("update_answer"));
        assert!(json.contains("=SUM(A1:A10)"));

        let req: Request = serde_json::from_str(r#"{"type":"read_aloud","index":2}"#).unwrap();
        assert_eq!(req.into_command(), Some(Command::ReadAloud { index: 2 }));
    }

    #[test]
    fn test_queries_carry_no_command() {
        assert_eq!(Request::Ping.into_command(), None);
        assert_eq!(Request::GetStatus.into_command(), None);
        assert_eq!(Request::Subscribe.into_command(), None);
        assert_eq!(Request::SubmitAnswer.into_command(), Some(Command::SubmitAnswer));
    }

    #[test]
    fn test_response_serialization() {
        let resp = Response::Status(DaemonStatus::new(5, SessionSnapshot::default()));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["session"]["stage"], "intro");
    }

    #[test]
    fn test_notification_nests_event() {
        let note = Notification::Event {
            event: StateEvent::StageChanged {
                from: Stage::Intro,
                to: Stage::Interview,
            },
        };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"]["type"], "stage_changed");
        assert_eq!(json["event"]["to"], "interview");
    }
}
