//! Engines backed by external processes
//!
//! Playback shells out to an espeak-ng compatible synthesizer; capture runs a
//! speech-to-text command and takes the first line it prints as the
//! transcript. Either one is killed on cancel/stop.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::EngineError;

use super::capture::{CaptureEngine, CaptureSink};
use super::playback::{SpeechEngine, SpeechSink, Utterance, Voice};

/// espeak-ng defaults the relative tuning is scaled from
const BASE_WORDS_PER_MINUTE: f32 = 175.0;
const BASE_PITCH: f32 = 50.0;
const BASE_AMPLITUDE: f32 = 100.0;

/// Split a configured command line into program and leading arguments
fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Parse `espeak-ng --voices=<lang>` output
///
/// espeak lists its default voice for the language first.
pub fn parse_voice_list(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            Some(Voice {
                id: fields[1].to_string(),
                name: fields[3].replace('_', " "),
                language: fields[1].to_string(),
                is_default: false,
            })
        })
        .enumerate()
        .map(|(i, mut voice)| {
            voice.is_default = i == 0;
            voice
        })
        .collect()
}

/// Slot holding the kill switch for the running process
type CancelSlot = Arc<Mutex<Option<oneshot::Sender<()>>>>;

fn fire(slot: &CancelSlot) {
    let sender = slot.lock().ok().and_then(|mut guard| guard.take());
    if let Some(tx) = sender {
        let _ = tx.send(());
    }
}

async fn kill(mut child: Child) {
    if let Err(e) = child.kill().await {
        debug!(?e, "engine process already gone");
    }
}

/// Text-to-speech through an external command
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    voices: Vec<Voice>,
    available: bool,
    running: CancelSlot,
}

impl CommandSpeech {
    /// Probe the synthesizer once and list its voices for `language`
    pub async fn probe(command: &str, language: &str) -> Self {
        let (program, args) = split_command(command).unwrap_or_default();

        let output = Command::new(&program)
            .args(&args)
            .arg(format!("--voices={language}"))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await;

        let (available, voices) = match output {
            Ok(out) if out.status.success() => {
                let voices = parse_voice_list(&String::from_utf8_lossy(&out.stdout));
                info!(%program, voices = voices.len(), "speech synthesizer found");
                (true, voices)
            }
            Ok(out) => {
                warn!(%program, status = ?out.status, "speech synthesizer probe failed");
                (false, Vec::new())
            }
            Err(e) => {
                warn!(%program, ?e, "speech synthesizer not runnable");
                (false, Vec::new())
            }
        };

        Self {
            program,
            args,
            voices,
            available,
            running: Arc::new(Mutex::new(None)),
        }
    }
}

impl SpeechEngine for CommandSpeech {
    fn is_available(&self) -> bool {
        self.available
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn speak(&self, utterance: Utterance, done: SpeechSink) -> Result<(), EngineError> {
        self.cancel();

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("-s")
            .arg(((BASE_WORDS_PER_MINUTE * utterance.rate).round() as u32).to_string())
            .arg("-p")
            .arg(((BASE_PITCH * utterance.pitch).round() as u32).to_string())
            .arg("-a")
            .arg(((BASE_AMPLITUDE * utterance.volume).round() as u32).to_string());
        if let Some(voice) = &utterance.voice {
            command.arg("-v").arg(voice);
        }
        let mut child = command
            .arg("--")
            .arg(&utterance.text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        if let Ok(mut slot) = self.running.lock() {
            *slot = Some(cancel_tx);
        }

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => done.finished(),
                    Ok(status) => done.failed(format!("synthesizer exited with {status}")),
                    Err(e) => done.failed(e.to_string()),
                },
                _ = cancel_rx => kill(child).await,
            }
        });

        Ok(())
    }

    fn cancel(&self) {
        fire(&self.running);
    }
}

/// Speech-to-text through an external command
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
    running: CancelSlot,
}

impl CommandCapture {
    pub fn new(command: &str) -> Option<Self> {
        let (program, args) = split_command(command)?;
        Some(Self {
            program,
            args,
            running: Arc::new(Mutex::new(None)),
        })
    }
}

impl CaptureEngine for CommandCapture {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&self, sink: CaptureSink) -> Result<(), EngineError> {
        let mut slot = self
            .running
            .lock()
            .map_err(|_| EngineError::Device("capture state poisoned".into()))?;
        if slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(EngineError::Busy);
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Device("capture command has no stdout".into()))?;

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *slot = Some(cancel_tx);
        sink.started();

        tokio::spawn(async move {
            let failure = run_activation(stdout, child, &mut cancel_rx, &sink).await;
            // Free the slot before the next activation can be requested
            drop(cancel_rx);
            match failure {
                None => sink.ended(),
                Some(reason) => sink.error(reason),
            }
        });

        Ok(())
    }

    fn stop(&self) {
        fire(&self.running);
    }
}

/// Read one transcript line or wait for the process to give up. Returns the
/// failure reason, `None` for a normal or cancelled end.
async fn run_activation(
    stdout: ChildStdout,
    mut child: Child,
    cancel_rx: &mut oneshot::Receiver<()>,
    sink: &CaptureSink,
) -> Option<String> {
    let mut lines = BufReader::new(stdout).lines();
    let line = tokio::select! {
        line = lines.next_line() => line,
        _ = &mut *cancel_rx => {
            kill(child).await;
            return None;
        }
    };

    match line {
        Ok(Some(text)) if !text.trim().is_empty() => {
            sink.transcript(text.trim());
            kill(child).await;
            None
        }
        Ok(_) => {
            let status = tokio::select! {
                status = child.wait() => status.ok(),
                _ = &mut *cancel_rx => {
                    kill(child).await;
                    return None;
                }
            };
            match status {
                Some(status) if status.success() => Some("no-speech".to_string()),
                Some(status) => Some(format!("capture exited with {status}")),
                None => Some("capture process lost".to_string()),
            }
        }
        Err(e) => {
            kill(child).await;
            Some(e.to_string())
        }
    }
}

/// Stand-in when no engine is configured
pub struct Unavailable;

impl CaptureEngine for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    fn start(&self, _sink: CaptureSink) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    fn stop(&self) {}
}

impl SpeechEngine for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn speak(&self, _utterance: Utterance, _done: SpeechSink) -> Result<(), EngineError> {
        Err(EngineError::Unavailable)
    }

    fn cancel(&self) {}
}
