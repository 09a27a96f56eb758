//! Session data owned by the controller

use serde::{Deserialize, Serialize};

/// Visible interview stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Waiting for the candidate to start
    #[default]
    Intro,
    /// Questions are being asked and answered
    Interview,
    /// Final report is shown
    Summary,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Intro => write!(f, "Intro"),
            Stage::Interview => write!(f, "Interview"),
            Stage::Summary => write!(f, "Summary"),
        }
    }
}

/// Who produced a transcript turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Interviewer,
    Candidate,
    System,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::Interviewer => write!(f, "interviewer"),
            Speaker::Candidate => write!(f, "candidate"),
            Speaker::System => write!(f, "system"),
        }
    }
}

/// One entry in the transcript log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// State of one interview
#[derive(Debug, Clone, Default)]
pub struct Session {
    stage: Stage,
    pending_answer: String,
    current_question: String,
    last_feedback: String,
    transcript: Vec<Turn>,
    summary: Option<String>,
    completed: bool,
    questions_asked: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Interview stage and not yet completed
    pub fn is_live(&self) -> bool {
        self.stage == Stage::Interview && !self.completed
    }

    pub fn pending_answer(&self) -> &str {
        &self.pending_answer
    }

    pub fn current_question(&self) -> &str {
        &self.current_question
    }

    pub fn last_feedback(&self) -> &str {
        &self.last_feedback
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    /// Number of answers recorded so far
    pub fn answered(&self) -> usize {
        self.transcript
            .iter()
            .filter(|t| t.speaker == Speaker::Candidate)
            .count()
    }

    /// 1-based number of the question being asked
    pub fn question_number(&self) -> usize {
        self.questions_asked
    }

    pub fn begin_interview(&mut self, question: &str) {
        self.stage = Stage::Interview;
        self.current_question = question.to_string();
        self.questions_asked = 1;
    }

    pub fn advance_question(&mut self, question: &str) {
        self.current_question = question.to_string();
        self.questions_asked += 1;
    }

    pub fn set_feedback(&mut self, feedback: &str) {
        self.last_feedback = feedback.to_string();
    }

    /// Move to Summary and mark complete
    pub fn complete(&mut self, summary: String) {
        self.stage = Stage::Summary;
        self.summary = Some(summary);
        self.completed = true;
    }

    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.transcript.push(Turn {
            speaker,
            text: text.into(),
        });
    }

    /// Append a captured fragment, space separated
    pub fn push_fragment(&mut self, fragment: &str) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            return;
        }
        let kept = self.pending_answer.trim_end().len();
        self.pending_answer.truncate(kept);
        if !self.pending_answer.is_empty() {
            self.pending_answer.push(' ');
        }
        self.pending_answer.push_str(fragment);
    }

    /// Replace the answer with typed text
    pub fn set_pending_answer(&mut self, text: String) {
        self.pending_answer = text;
    }

    pub fn clear_pending_answer(&mut self) {
        self.pending_answer.clear();
    }

    /// Remove a submitted answer, keeping anything captured after it
    pub fn consume_answer(&mut self, submitted: &str) {
        self.pending_answer = self
            .pending_answer
            .trim_start()
            .strip_prefix(submitted)
            .map(|rest| rest.trim().to_string())
            .unwrap_or_default();
    }
}
