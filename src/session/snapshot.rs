//! Point-in-time view of the session for the UI

use serde::{Deserialize, Serialize};

use crate::voice::ArbiterState;

use super::model::{Stage, Turn};

/// Everything a client needs to render the current stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub stage: Stage,
    pub current_question: String,
    /// 1-based; 0 before the interview starts
    pub question_number: usize,
    pub planned_questions: usize,
    pub pending_answer: String,
    pub transcript: Vec<Turn>,
    pub summary: Option<String>,
    pub completed: bool,

    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub deadline_expired: bool,

    pub auto_listen: bool,
    pub capturing: bool,
    pub speaking: bool,
    pub arbiter: ArbiterState,
    pub capture_supported: bool,
    pub playback_supported: bool,

    pub request_in_flight: bool,
    /// Submit control is enabled
    pub can_submit: bool,
}
