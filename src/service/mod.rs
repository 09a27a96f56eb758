//! Interview service boundary
//!
//! The remote service owns questions, scoring and summaries. The controller
//! only sees [`InterviewService`] and receives results as [`ServiceReply`]
//! events.

mod client;
mod protocol;

pub use client::{HttpInterviewService, InterviewService};
pub use protocol::{AnswerReply, NextQuestion, StartReply, TimeoutReply};

use crate::error::ServiceError;

/// Outcome of one service call, posted back to the controller loop
#[derive(Debug)]
pub enum ServiceReply {
    Started(Result<StartReply, ServiceError>),
    Answered {
        /// Text that was submitted
        answer: String,
        result: Result<AnswerReply, ServiceError>,
    },
    TimedOut(Result<TimeoutReply, ServiceError>),
}
