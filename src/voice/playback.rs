//! Playback engine adapter
//!
//! Queue-of-one text-to-speech: a new utterance cancels the current one, and
//! only the latest utterance can report completion.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::events::Event;

/// Speaking rate relative to the engine default
pub const SPEECH_RATE: f32 = 0.8;
/// Pitch relative to the engine default
pub const SPEECH_PITCH: f32 = 0.9;
/// Output volume, 0.0 to 1.0
pub const SPEECH_VOLUME: f32 = 0.85;

/// Name fragments that mark a voice as sounding natural
const HUMAN_LIKE: &[&str] = &["natural", "neural", "female", "samantha", "karen", "susan"];

/// A voice offered by the synthesizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Identifier passed back to the engine
    pub id: String,
    pub name: String,
    /// BCP-47 style tag, e.g. "en-GB"
    pub language: String,
    /// Platform default voice
    pub is_default: bool,
}

/// One synthesis request
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: u64,
    pub text: String,
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

/// A text-to-speech device
pub trait SpeechEngine: Send + Sync {
    /// Checked once when the adapter is built
    fn is_available(&self) -> bool;

    fn voices(&self) -> Vec<Voice>;

    /// Begin speaking; report through `done` unless cancelled first
    fn speak(&self, utterance: Utterance, done: SpeechSink) -> Result<(), EngineError>;

    fn cancel(&self);
}

/// Completion handle for one utterance
#[derive(Debug, Clone)]
pub struct SpeechSink {
    utterance: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl SpeechSink {
    pub fn new(utterance: u64, events: mpsc::UnboundedSender<Event>) -> Self {
        Self { utterance, events }
    }

    pub fn utterance(&self) -> u64 {
        self.utterance
    }

    pub fn finished(&self) {
        let _ = self.events.send(Event::SpeechEnded {
            utterance: self.utterance,
        });
    }

    pub fn failed(&self, reason: impl Into<String>) {
        let _ = self.events.send(Event::SpeechFailed {
            utterance: self.utterance,
            reason: reason.into(),
        });
    }
}

/// Pick a voice for `language`
///
/// Prefers natural-sounding voices; otherwise the first matching voice that
/// is not the platform default, falling back to the default itself.
pub fn select_voice(voices: &[Voice], language: &str) -> Option<Voice> {
    let language = language.to_ascii_lowercase();
    let matching: Vec<&Voice> = voices
        .iter()
        .filter(|v| v.language.to_ascii_lowercase().starts_with(&language))
        .collect();

    let human_like = matching.iter().find(|v| {
        let name = v.name.to_ascii_lowercase();
        HUMAN_LIKE.iter().any(|tag| name.contains(tag))
    });

    human_like
        .or_else(|| matching.iter().find(|v| !v.is_default))
        .or_else(|| matching.first())
        .map(|v| (*v).clone())
}

pub struct PlaybackAdapter {
    engine: Box<dyn SpeechEngine>,
    supported: bool,
    voice: Option<Voice>,
    current: Option<u64>,
    next_id: u64,
    events: mpsc::UnboundedSender<Event>,
}

impl PlaybackAdapter {
    pub fn new(
        engine: Box<dyn SpeechEngine>,
        language: &str,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let supported = engine.is_available();
        let voice = if supported {
            select_voice(&engine.voices(), language)
        } else {
            warn!("speech playback unavailable, interviewer text is text-only");
            None
        };
        if let Some(v) = &voice {
            info!(voice = %v.name, language = %v.language, "voice selected");
        }

        Self {
            engine,
            supported,
            voice,
            current: None,
            next_id: 0,
            events,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Id of the utterance that may still complete
    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// Speak `text`, superseding anything in flight. Returns the utterance id,
    /// or `None` when nothing will be spoken.
    pub fn speak(&mut self, text: &str) -> Option<u64> {
        if !self.supported {
            return None;
        }
        self.cancel();

        self.next_id += 1;
        let utterance = Utterance {
            id: self.next_id,
            text: text.to_string(),
            voice: self.voice.as_ref().map(|v| v.id.clone()),
            rate: SPEECH_RATE,
            pitch: SPEECH_PITCH,
            volume: SPEECH_VOLUME,
        };
        let sink = SpeechSink::new(utterance.id, self.events.clone());

        match self.engine.speak(utterance, sink) {
            Ok(()) => {
                debug!(utterance = self.next_id, chars = text.len(), "speaking");
                self.current = Some(self.next_id);
                self.current
            }
            Err(e) => {
                warn!(?e, "speech failed to start");
                None
            }
        }
    }

    /// Stop the current utterance. Returns whether anything was playing.
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(id) => {
                debug!(utterance = id, "speech cancelled");
                self.engine.cancel();
                true
            }
            None => false,
        }
    }

    /// Engine finished `utterance`; true only for the live utterance
    pub fn on_finished(&mut self, utterance: u64) -> bool {
        if self.current != Some(utterance) {
            debug!(utterance, "completion for superseded utterance");
            return false;
        }
        self.current = None;
        true
    }

    /// Engine failed `utterance`; true only for the live utterance
    pub fn on_failed(&mut self, utterance: u64, reason: &str) -> bool {
        if self.current != Some(utterance) {
            return false;
        }
        warn!(utterance, %reason, "speech playback error");
        self.current = None;
        true
    }
}
