//! Interview service wire types
//!
//! All bodies are JSON. A 2xx body may carry `{"error": "..."}` instead of
//! the expected shape; the client turns that into an application error
//! before these types are decoded.

use serde::{Deserialize, Serialize};

/// `POST /start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReply {
    pub intro: String,
    pub question: String,
    /// Seconds allowed for the first question
    pub timer: u32,
}

/// Body of `POST /answer`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

/// `POST /answer`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerReply {
    pub feedback: String,
    pub completed: bool,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub timer: Option<u32>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// `POST /timeout`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutReply {
    pub completed: bool,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub timer: Option<u32>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// `GET` on the service root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReply {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Next question to ask, when a reply carries one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextQuestion {
    pub question: String,
    pub timer: u32,
}

impl AnswerReply {
    pub fn next_question(&self) -> Option<NextQuestion> {
        next_question(&self.question, self.timer)
    }
}

impl TimeoutReply {
    pub fn next_question(&self) -> Option<NextQuestion> {
        next_question(&self.question, self.timer)
    }
}

fn next_question(question: &Option<String>, timer: Option<u32>) -> Option<NextQuestion> {
    match (question, timer) {
        (Some(q), Some(t)) if !q.trim().is_empty() => Some(NextQuestion {
            question: q.clone(),
            timer: t,
        }),
        _ => None,
    }
}
