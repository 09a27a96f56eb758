//! Voice channel: capture and playback engines plus the arbiter between them
//!
//! - capture: single-shot speech-to-text adapter
//! - playback: queue-of-one text-to-speech adapter and voice policy
//! - arbiter: half-duplex turn taking
//! - command: process-backed engines used by the daemon

mod arbiter;
mod capture;
mod command;
mod playback;
mod schedule;

pub use arbiter::{ArbiterState, TurnArbiter, VoiceChannelState};
pub use capture::{CaptureAdapter, CaptureEngine, CaptureUpdate, StopReason};
pub use command::{CommandCapture, CommandSpeech, Unavailable};
pub use playback::{PlaybackAdapter, SpeechEngine};

#[cfg(test)]
pub(crate) use capture::fake::FakeCapture;
#[cfg(test)]
pub(crate) use playback::fake::FakeSpeech;
