//! Capture engine adapter
//!
//! Speech-to-text engines are single-shot: one `start()` yields at most one
//! transcript and then ends. The adapter numbers each activation and drops
//! signals that belong to an earlier one.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::events::{CaptureSignal, Event};

/// A speech-to-text device
///
/// `start` must return promptly; the engine reports progress through the
/// sink from any thread or task. After `stop` the engine must eventually
/// report `ended` (or `error`) for that activation.
pub trait CaptureEngine: Send + Sync {
    /// Checked once when the adapter is built
    fn is_available(&self) -> bool;

    fn start(&self, sink: CaptureSink) -> Result<(), EngineError>;

    fn stop(&self);
}

/// Reporting handle given to the engine for one activation
#[derive(Debug, Clone)]
pub struct CaptureSink {
    activation: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl CaptureSink {
    pub fn new(activation: u64, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { activation, events }
    }

    pub fn activation(&self) -> u64 {
        self.activation
    }

    pub fn started(&self) {
        self.send(CaptureSignal::Started);
    }

    pub fn transcript(&self, text: impl Into<String>) {
        self.send(CaptureSignal::Transcript(text.into()));
    }

    pub fn ended(&self) {
        self.send(CaptureSignal::Ended);
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.send(CaptureSignal::Error(reason.into()));
    }

    fn send(&self, signal: CaptureSignal) {
        let _ = self.events.send(Event::Capture {
            activation: self.activation,
            signal,
        });
    }
}

/// Why capture was stopped on purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Answer is being submitted
    Submission,
    /// Channel handed to playback
    Speaking,
    /// Auto-listen turned off
    IntentOff,
    /// Interview stage ended
    SessionEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Starting,
    Capturing,
}

/// What a signal meant after filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    /// Stale or duplicate signal
    Ignored,
    Started,
    Transcript(String),
    /// Activation finished; `stopped` is set when it was stopped on purpose
    Ended { stopped: Option<StopReason> },
    /// Activation failed without a deliberate stop
    Failed { reason: String },
}

pub struct CaptureAdapter {
    engine: Box<dyn CaptureEngine>,
    supported: bool,
    phase: Phase,
    activation: u64,
    stop_reason: Option<StopReason>,
    transcript_seen: bool,
    events: mpsc::UnboundedSender<Event>,
}

impl CaptureAdapter {
    pub fn new(engine: Box<dyn CaptureEngine>, events: mpsc::UnboundedSender<Event>) -> Self {
        let supported = engine.is_available();
        if !supported {
            warn!("speech capture unavailable, answers must be typed");
        }
        Self {
            engine,
            supported,
            phase: Phase::Idle,
            activation: 0,
            stop_reason: None,
            transcript_seen: false,
            events,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Engine confirmed it is listening
    pub fn is_capturing(&self) -> bool {
        self.phase == Phase::Capturing
    }

    /// An activation is open (starting, capturing or winding down)
    pub fn is_active(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Id of the most recent activation
    pub fn activation(&self) -> u64 {
        self.activation
    }

    /// Begin one capture attempt. Returns false if unsupported, already
    /// active, or the engine refused.
    pub fn start(&mut self) -> bool {
        if !self.supported || self.phase != Phase::Idle {
            return false;
        }

        self.activation += 1;
        self.phase = Phase::Starting;
        self.stop_reason = None;
        self.transcript_seen = false;

        let sink = CaptureSink::new(self.activation, self.events.clone());
        match self.engine.start(sink) {
            Ok(()) => {
                debug!(activation = self.activation, "capture requested");
                true
            }
            Err(e) => {
                warn!(?e, activation = self.activation, "capture failed to start");
                self.phase = Phase::Idle;
                false
            }
        }
    }

    /// Request early termination. Only the first reason is kept.
    pub fn stop(&mut self, reason: StopReason) {
        if self.phase == Phase::Idle || self.stop_reason.is_some() {
            return;
        }
        debug!(activation = self.activation, ?reason, "capture stop requested");
        self.stop_reason = Some(reason);
        self.engine.stop();
    }

    pub fn on_signal(&mut self, activation: u64, signal: CaptureSignal) -> CaptureUpdate {
        if activation != self.activation || self.phase == Phase::Idle {
            debug!(activation, current = self.activation, ?signal, "stale capture signal");
            return CaptureUpdate::Ignored;
        }

        match signal {
            CaptureSignal::Started => {
                // A stop is already on its way; the engine will end shortly
                if self.phase != Phase::Starting || self.stop_reason.is_some() {
                    return CaptureUpdate::Ignored;
                }
                self.phase = Phase::Capturing;
                info!(activation, "listening");
                CaptureUpdate::Started
            }
            CaptureSignal::Transcript(text) => {
                if self.transcript_seen {
                    return CaptureUpdate::Ignored;
                }
                self.transcript_seen = true;
                CaptureUpdate::Transcript(text)
            }
            CaptureSignal::Ended => {
                self.phase = Phase::Idle;
                debug!(activation, "capture ended");
                CaptureUpdate::Ended {
                    stopped: self.stop_reason.take(),
                }
            }
            CaptureSignal::Error(reason) => {
                self.phase = Phase::Idle;
                match self.stop_reason.take() {
                    Some(stopped) => CaptureUpdate::Ended {
                        stopped: Some(stopped),
                    },
                    None => {
                        warn!(activation, %reason, "capture error");
                        CaptureUpdate::Failed { reason }
                    }
                }
            }
        }
    }
}
