//! Turn arbitration between capture and playback
//!
//! The engines are single-shot and unaware of each other. The arbiter is the
//! only place that enforces "never both channels open": capture preempts
//! playback when it starts, playback waits for capture to release the device,
//! and capture is re-armed after speech ends or a capture attempt finishes.
//!
//! Every delayed action carries an epoch and re-checks intent and session
//! state when it fires, so a restart scheduled before a cancellation does
//! nothing.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::events::{CaptureSignal, Event, ScheduledAction};

use super::capture::{CaptureAdapter, CaptureUpdate, StopReason};
use super::playback::PlaybackAdapter;
use super::schedule::Delay;

/// Which side currently owns the voice channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterState {
    #[default]
    Idle,
    Listening,
    Speaking,
    /// Handing over: capture winding down, restart or next utterance pending
    Transitioning,
}

impl std::fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArbiterState::Idle => write!(f, "Idle"),
            ArbiterState::Listening => write!(f, "Listening"),
            ArbiterState::Speaking => write!(f, "Speaking"),
            ArbiterState::Transitioning => write!(f, "Transitioning"),
        }
    }
}

/// Observable voice flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceChannelState {
    /// Auto-listen intent
    pub listening_enabled: bool,
    pub is_capturing: bool,
    pub is_speaking: bool,
}

pub struct TurnArbiter {
    capture: CaptureAdapter,
    playback: PlaybackAdapter,
    auto_listen: bool,
    /// Interviewer lines still to be spoken, in order
    script: VecDeque<String>,
    /// Speech is parked until capture releases the device
    awaiting_release: bool,
    /// Re-arm once the current activation ends, whatever stopped it
    rearm_on_release: bool,
    restart: Delay,
    restart_epoch: u64,
    gap: Delay,
    gap_epoch: u64,
    capture_errors: u32,
    settle_delay: Duration,
    utterance_gap: Duration,
    max_capture_errors: u32,
    events: mpsc::UnboundedSender<Event>,
}

impl TurnArbiter {
    pub fn new(
        capture: CaptureAdapter,
        playback: PlaybackAdapter,
        config: &VoiceConfig,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            capture,
            playback,
            auto_listen: false,
            script: VecDeque::new(),
            awaiting_release: false,
            rearm_on_release: false,
            restart: Delay::default(),
            restart_epoch: 0,
            gap: Delay::default(),
            gap_epoch: 0,
            capture_errors: 0,
            settle_delay: config.settle_delay,
            utterance_gap: config.utterance_gap,
            max_capture_errors: config.max_capture_errors,
            events,
        }
    }

    pub fn capture(&self) -> &CaptureAdapter {
        &self.capture
    }

    pub fn playback(&self) -> &PlaybackAdapter {
        &self.playback
    }

    pub fn auto_listen(&self) -> bool {
        self.auto_listen
    }

    pub fn channel_state(&self) -> VoiceChannelState {
        VoiceChannelState {
            listening_enabled: self.auto_listen,
            is_capturing: self.capture.is_capturing(),
            is_speaking: self.playback.is_speaking(),
        }
    }

    pub fn state(&self) -> ArbiterState {
        if self.playback.is_speaking() {
            ArbiterState::Speaking
        } else if self.capture.is_capturing() {
            ArbiterState::Listening
        } else if self.capture.is_active()
            || self.awaiting_release
            || self.restart.is_pending()
            || self.gap.is_pending()
        {
            ArbiterState::Transitioning
        } else {
            ArbiterState::Idle
        }
    }

    /// Speak `lines` in order, replacing anything queued or playing
    pub fn say(&mut self, lines: Vec<String>, live: bool) {
        self.cancel_restart();
        self.cancel_gap();
        self.playback.cancel();
        self.script = lines.into_iter().filter(|l| !l.trim().is_empty()).collect();
        self.advance_script(live);
    }

    pub fn speak(&mut self, text: &str, live: bool) {
        self.say(vec![text.to_string()], live);
    }

    /// Turn the auto-listen intent on or off. Returns whether it changed.
    pub fn set_auto_listen(&mut self, enabled: bool, live: bool) -> bool {
        if enabled == self.auto_listen {
            return false;
        }
        self.auto_listen = enabled;
        info!(enabled, "auto-listen toggled");

        if enabled {
            self.capture_errors = 0;
            if live && self.channel_free_for_capture() {
                self.capture.start();
            } else if self.capture.is_active() {
                // Previous activation still winding down
                self.rearm_on_release = true;
            }
        } else {
            self.cancel_restart();
            self.rearm_on_release = false;
            self.capture.stop(StopReason::IntentOff);
        }
        true
    }

    /// One manual capture attempt while auto-listen is off
    pub fn capture_once(&mut self, live: bool) -> bool {
        if self.auto_listen || !live || self.capture.is_active() {
            return false;
        }
        self.cancel_restart();
        self.capture.start()
    }

    /// Stop capture on purpose; no automatic restart follows its end
    pub fn stop_capture(&mut self, reason: StopReason) {
        self.cancel_restart();
        self.rearm_on_release = false;
        self.capture.stop(reason);
    }

    /// Re-arm capture after an interruption that produced no speech
    pub fn resume(&mut self, live: bool) {
        if self.capture.is_active() {
            self.rearm_on_release = true;
        } else {
            self.schedule_restart(live);
        }
    }

    /// Close both channels and drop all pending work. Idempotent.
    pub fn silence(&mut self) {
        self.auto_listen = false;
        self.cancel_restart();
        self.cancel_gap();
        self.script.clear();
        self.awaiting_release = false;
        self.rearm_on_release = false;
        self.capture.stop(StopReason::SessionEnded);
        self.playback.cancel();
    }

    /// Fresh channel for a new interview
    pub fn reset(&mut self, auto_listen: bool) {
        self.silence();
        self.auto_listen = auto_listen;
        self.capture_errors = 0;
    }

    pub fn on_capture(&mut self, activation: u64, signal: CaptureSignal, live: bool) -> CaptureUpdate {
        let update = self.capture.on_signal(activation, signal);

        match &update {
            CaptureUpdate::Started => {
                self.capture_errors = 0;
                if self.playback.is_speaking() || !self.script.is_empty() {
                    info!("capture started, cutting off playback");
                    self.cancel_gap();
                    self.script.clear();
                    self.playback.cancel();
                }
            }
            CaptureUpdate::Ended { stopped } => {
                let rearm = std::mem::take(&mut self.rearm_on_release);
                if self.awaiting_release {
                    self.advance_script(live);
                } else if stopped.is_none() || rearm {
                    self.schedule_restart(live);
                }
            }
            CaptureUpdate::Failed { .. } => {
                self.rearm_on_release = false;
                self.capture_errors += 1;
                if self.awaiting_release {
                    self.advance_script(live);
                } else {
                    self.schedule_restart(live);
                }
            }
            CaptureUpdate::Transcript(_) | CaptureUpdate::Ignored => {}
        }

        update
    }

    pub fn on_speech_ended(&mut self, utterance: u64, live: bool) {
        if self.playback.on_finished(utterance) {
            self.after_utterance(live);
        }
    }

    pub fn on_speech_failed(&mut self, utterance: u64, reason: &str, live: bool) {
        if self.playback.on_failed(utterance, reason) {
            self.after_utterance(live);
        }
    }

    pub fn on_scheduled(&mut self, action: ScheduledAction, live: bool) {
        match action {
            ScheduledAction::RestartCapture { epoch } => {
                if epoch != self.restart_epoch {
                    debug!(epoch, current = self.restart_epoch, "stale capture restart");
                    return;
                }
                if self.auto_listen && live && self.channel_free_for_capture() {
                    debug!("re-arming capture");
                    self.capture.start();
                }
            }
            ScheduledAction::NextUtterance { epoch } => {
                if epoch != self.gap_epoch {
                    debug!(epoch, current = self.gap_epoch, "stale utterance gap");
                    return;
                }
                self.advance_script(live);
            }
        }
    }

    fn after_utterance(&mut self, live: bool) {
        self.capture_errors = 0;
        if self.script.is_empty() {
            self.schedule_restart(live);
        } else {
            self.gap_epoch += 1;
            let epoch = self.gap_epoch;
            self.gap
                .schedule(&self.events, self.utterance_gap, ScheduledAction::NextUtterance { epoch });
        }
    }

    fn advance_script(&mut self, live: bool) {
        self.awaiting_release = false;

        if !self.playback.is_supported() {
            self.script.clear();
        }
        if self.script.is_empty() {
            self.schedule_restart(live);
            return;
        }

        // Playback needs the device; let capture finish first
        if self.capture.is_active() {
            self.capture.stop(StopReason::Speaking);
            self.awaiting_release = true;
            return;
        }

        while let Some(line) = self.script.pop_front() {
            if self.playback.speak(&line).is_some() {
                return;
            }
        }
        self.schedule_restart(live);
    }

    fn schedule_restart(&mut self, live: bool) {
        if !self.auto_listen || !live || !self.capture.is_supported() {
            return;
        }
        if self.capture_errors >= self.max_capture_errors {
            warn!(
                errors = self.capture_errors,
                "capture keeps failing, waiting for next speech or toggle"
            );
            return;
        }
        self.restart_epoch += 1;
        let epoch = self.restart_epoch;
        self.restart
            .schedule(&self.events, self.settle_delay, ScheduledAction::RestartCapture { epoch });
    }

    fn cancel_restart(&mut self) {
        self.restart_epoch += 1;
        self.restart.cancel();
    }

    fn cancel_gap(&mut self) {
        self.gap_epoch += 1;
        self.gap.cancel();
    }

    fn channel_free_for_capture(&self) -> bool {
        !self.playback.is_speaking()
            && self.script.is_empty()
            && !self.awaiting_release
            && !self.capture.is_active()
    }
}
