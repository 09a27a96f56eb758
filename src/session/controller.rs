//! Session controller
//!
//! Consumes [`Event`]s one at a time and drives the Intro -> Interview ->
//! Summary flow. Service calls run on spawned tasks and come back as
//! [`Event::ServiceReply`] tagged with a request id; only the reply for the
//! request currently in flight is applied, which makes question advancement
//! happen exactly once per question even when a submit races the deadline.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::error::ServiceError;
use crate::events::{CaptureSignal, Command, Event, StateEvent};
use crate::service::{AnswerReply, InterviewService, NextQuestion, ServiceReply, StartReply, TimeoutReply};
use crate::voice::{
    CaptureAdapter, CaptureEngine, CaptureUpdate, PlaybackAdapter, SpeechEngine, StopReason,
    TurnArbiter, VoiceChannelState,
};

use super::deadline::{Deadline, TickOutcome};
use super::model::{Session, Speaker, Stage};
use super::snapshot::SessionSnapshot;

const TIME_EXPIRED_NEXT: &str = "Time expired - Moving to next question";
const TIME_EXPIRED_END: &str = "Time expired - Interview ended";
const TIMEOUT_FALLBACK_SUMMARY: &str = "Interview ended due to timeout. Summary generation failed.";
const COMPLETED_FALLBACK_SUMMARY: &str = "Interview completed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Start,
    Answer,
    Timeout,
}

/// What to send to the service
enum Request {
    Start,
    Answer(String),
    Timeout,
}

impl Request {
    fn kind(&self) -> RequestKind {
        match self {
            Request::Start => RequestKind::Start,
            Request::Answer(_) => RequestKind::Answer,
            Request::Timeout => RequestKind::Timeout,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    id: u64,
    kind: RequestKind,
}

pub struct SessionController {
    session: Session,
    stage_entered_at: Instant,
    deadline: Deadline,
    arbiter: TurnArbiter,
    service: Arc<dyn InterviewService>,
    voice: VoiceConfig,
    /// At most one service request is outstanding
    in_flight: Option<InFlight>,
    next_request: u64,
    /// Last voice flags published to subscribers
    published_voice: VoiceChannelState,
    events: mpsc::UnboundedSender<Event>,
    notify: broadcast::Sender<StateEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    pub fn new(
        service: Arc<dyn InterviewService>,
        capture: Box<dyn CaptureEngine>,
        speech: Box<dyn SpeechEngine>,
        voice: VoiceConfig,
        events: mpsc::UnboundedSender<Event>,
        notify: broadcast::Sender<StateEvent>,
    ) -> Self {
        let capture = CaptureAdapter::new(capture, events.clone());
        let playback = PlaybackAdapter::new(speech, &voice.language, events.clone());
        let arbiter = TurnArbiter::new(capture, playback, &voice, events.clone());
        let (snapshot, _) = watch::channel(SessionSnapshot::default());

        let controller = Self {
            session: Session::new(),
            stage_entered_at: Instant::now(),
            deadline: Deadline::new(events.clone()),
            arbiter,
            service,
            voice,
            in_flight: None,
            next_request: 0,
            published_voice: VoiceChannelState::default(),
            events,
            notify,
            snapshot,
        };
        controller.publish_snapshot();
        controller
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn deadline(&self) -> &Deadline {
        &self.deadline
    }

    pub fn arbiter(&self) -> &TurnArbiter {
        &self.arbiter
    }

    /// Receiver that always holds the latest snapshot
    pub fn snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub async fn run(&mut self, mut events_rx: mpsc::UnboundedReceiver<Event>) {
        info!(
            capture = self.arbiter.capture().is_supported(),
            playback = self.arbiter.playback().is_supported(),
            "session controller started in Intro stage"
        );

        while let Some(event) = events_rx.recv().await {
            self.handle(event);
        }

        info!("session controller stopped");
    }

    /// Apply one event, then publish whatever it changed
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Capture { activation, signal } => self.handle_capture(activation, signal),
            Event::SpeechEnded { utterance } => {
                let live = self.session.is_live();
                self.arbiter.on_speech_ended(utterance, live);
            }
            Event::SpeechFailed { utterance, reason } => {
                let live = self.session.is_live();
                self.arbiter.on_speech_failed(utterance, &reason, live);
            }
            Event::TimerTick { generation } => self.handle_tick(generation),
            Event::Scheduled(action) => {
                let live = self.session.is_live();
                self.arbiter.on_scheduled(action, live);
            }
            Event::ServiceReply { request, reply } => self.handle_reply(request, reply),
        }

        self.publish_voice();
        self.publish_snapshot();
    }

    fn handle_command(&mut self, command: Command) {
        debug!(?command, "command");
        match command {
            Command::StartInterview => self.start_interview(),
            Command::UpdateAnswer { text } => {
                if !self.accepting_answer() {
                    debug!(stage = %self.session.stage(), "answer edit ignored");
                    return;
                }
                self.session.set_pending_answer(text);
                self.emit_answer();
            }
            Command::SubmitAnswer => self.submit_answer(),
            Command::ToggleAutoListen => {
                let enable = !self.arbiter.auto_listen();
                if enable && !self.accepting_answer() {
                    debug!("auto-listen only available while a question is open");
                    return;
                }
                let live = self.session.is_live();
                self.arbiter.set_auto_listen(enable, live);
            }
            Command::CaptureOnce => {
                let live = self.accepting_answer();
                if !self.arbiter.capture_once(live) {
                    debug!("single capture not started");
                }
            }
            Command::ReadAloud { index } => {
                let text = match self.session.transcript().get(index) {
                    Some(turn) if turn.speaker == Speaker::Interviewer => turn.text.clone(),
                    _ => {
                        debug!(index, "no interviewer turn to read aloud");
                        return;
                    }
                };
                let live = self.session.is_live();
                self.arbiter.speak(&text, live);
            }
            Command::ReadSummary => match self.session.summary() {
                Some(summary) => {
                    let summary = summary.to_string();
                    self.arbiter.speak(&summary, false);
                }
                None => debug!("no summary to read"),
            },
        }
    }

    /// A question is open and its answer can still change
    fn accepting_answer(&self) -> bool {
        self.session.is_live() && !self.deadline.is_expired()
    }

    fn start_interview(&mut self) {
        if let Some(in_flight) = self.in_flight {
            debug!(request = in_flight.id, "start ignored, request in flight");
            return;
        }
        if self.session.is_live() {
            debug!("start ignored, interview already running");
            return;
        }
        self.dispatch(Request::Start);
    }

    fn submit_answer(&mut self) {
        if !self.accepting_answer() {
            debug!(stage = %self.session.stage(), "submit ignored, no open question");
            return;
        }
        if let Some(in_flight) = self.in_flight {
            debug!(request = in_flight.id, "submit ignored, request in flight");
            return;
        }
        let answer = self.session.pending_answer().trim().to_string();
        if answer.is_empty() {
            debug!("submit ignored, empty answer");
            return;
        }

        self.arbiter.stop_capture(StopReason::Submission);
        self.dispatch(Request::Answer(answer));
    }

    fn handle_capture(&mut self, activation: u64, signal: CaptureSignal) {
        let live = self.session.is_live();
        match self.arbiter.on_capture(activation, signal, live) {
            CaptureUpdate::Transcript(text) if live => {
                self.session.push_fragment(&text);
                self.emit_answer();
            }
            CaptureUpdate::Transcript(_) => debug!("transcript outside an interview dropped"),
            CaptureUpdate::Failed { reason } => debug!(%reason, "capture attempt failed"),
            _ => {}
        }
    }

    fn handle_tick(&mut self, generation: u64) {
        let live = self.session.is_live();
        match self.deadline.tick(generation, live) {
            TickOutcome::Ticked(remaining_seconds) => self.emit(StateEvent::DeadlineTick {
                remaining_seconds,
                total_seconds: self.deadline.total_seconds(),
            }),
            TickOutcome::Expired => {
                self.emit(StateEvent::DeadlineTick {
                    remaining_seconds: 0,
                    total_seconds: self.deadline.total_seconds(),
                });
                self.emit(StateEvent::DeadlineExpired);
                self.handle_timeout();
            }
            TickOutcome::Stale | TickOutcome::Held => {}
        }
    }

    fn handle_timeout(&mut self) {
        info!(question = self.session.question_number(), "deadline expired");
        if let Some(InFlight {
            id,
            kind: RequestKind::Answer,
        }) = self.in_flight
        {
            info!(request = id, "answer still in flight, timeout takes over");
        }

        let live = self.session.is_live();
        self.arbiter.stop_capture(StopReason::IntentOff);
        self.arbiter.set_auto_listen(false, live);
        self.dispatch(Request::Timeout);
    }

    /// Send a request, superseding whatever was in flight
    fn dispatch(&mut self, request: Request) {
        self.next_request += 1;
        let id = self.next_request;
        let kind = request.kind();
        self.in_flight = Some(InFlight { id, kind });
        debug!(request = id, ?kind, "service request");

        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        tokio::spawn(async move {
            let reply = match request {
                Request::Start => ServiceReply::Started(service.start().await),
                Request::Answer(answer) => {
                    let result = service.answer(&answer).await;
                    ServiceReply::Answered { answer, result }
                }
                Request::Timeout => ServiceReply::TimedOut(service.timeout().await),
            };
            let _ = events.send(Event::ServiceReply { request: id, reply });
        });
    }

    fn handle_reply(&mut self, request: u64, reply: ServiceReply) {
        match self.in_flight {
            Some(in_flight) if in_flight.id == request => self.in_flight = None,
            _ => {
                debug!(request, "discarding superseded service reply");
                return;
            }
        }

        match reply {
            ServiceReply::Started(result) => self.on_started(result),
            ServiceReply::Answered { answer, result } => self.on_answered(answer, result),
            ServiceReply::TimedOut(result) => self.on_timed_out(result),
        }
    }

    fn on_started(&mut self, result: Result<StartReply, ServiceError>) {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "failed to start interview");
                self.alert(format!("Error starting interview: {e}"));
                return;
            }
        };

        let from = self.session.stage();
        self.session = Session::new();
        self.session.begin_interview(&reply.question);
        self.arbiter.reset(self.voice.auto_listen);
        self.emit(StateEvent::AnswerUpdated {
            text: String::new(),
        });
        self.transition(from, Stage::Interview);

        self.arm_deadline(reply.timer);
        self.append_turn(Speaker::Interviewer, &reply.intro);
        self.append_turn(Speaker::Interviewer, &reply.question);
        self.arbiter.say(vec![reply.intro, reply.question], true);
    }

    fn on_answered(&mut self, answer: String, result: Result<AnswerReply, ServiceError>) {
        let reply = match result.and_then(|reply| {
            if reply.completed || reply.next_question().is_some() {
                Ok(reply)
            } else {
                Err(ServiceError::Malformed(
                    "reply has neither a next question nor completion".to_string(),
                ))
            }
        }) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "answer submission failed");
                self.alert(format!("Error submitting answer: {e}"));
                let live = self.session.is_live();
                self.arbiter.resume(live);
                return;
            }
        };

        self.session.consume_answer(&answer);
        self.emit_answer();
        self.append_turn(Speaker::Candidate, &answer);
        self.session.set_feedback(&reply.feedback);
        self.append_turn(Speaker::Interviewer, &reply.feedback);

        match reply.next_question() {
            Some(next) if !reply.completed => self.advance(next, vec![reply.feedback]),
            _ => {
                let summary = reply
                    .summary
                    .unwrap_or_else(|| COMPLETED_FALLBACK_SUMMARY.to_string());
                self.finish(summary);
                self.arbiter.speak(&reply.feedback, false);
            }
        }
    }

    fn on_timed_out(&mut self, result: Result<TimeoutReply, ServiceError>) {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                self.force_summary(&e.to_string());
                return;
            }
        };

        if reply.completed {
            self.append_turn(Speaker::System, TIME_EXPIRED_END);
            let summary = reply
                .summary
                .unwrap_or_else(|| TIMEOUT_FALLBACK_SUMMARY.to_string());
            self.finish(summary);
            return;
        }

        let Some(next) = reply.next_question() else {
            self.force_summary("reply has no next question");
            return;
        };

        self.session.clear_pending_answer();
        self.emit_answer();
        self.append_turn(Speaker::System, TIME_EXPIRED_NEXT);

        let mut preface = Vec::new();
        if let Some(feedback) = reply.feedback.filter(|f| !f.trim().is_empty()) {
            self.session.set_feedback(&feedback);
            self.append_turn(Speaker::Interviewer, &feedback);
            preface.push(feedback);
        }
        self.advance(next, preface);
    }

    /// Timeout handling failed; end the interview rather than hang
    fn force_summary(&mut self, reason: &str) {
        warn!(%reason, "timeout handling failed, ending interview");
        self.append_turn(Speaker::System, TIME_EXPIRED_END);
        self.finish(TIMEOUT_FALLBACK_SUMMARY.to_string());
    }

    fn advance(&mut self, next: NextQuestion, mut lines: Vec<String>) {
        self.session.advance_question(&next.question);
        info!(
            question = self.session.question_number(),
            timer = next.timer,
            "next question"
        );
        self.arm_deadline(next.timer);
        self.append_turn(Speaker::Interviewer, &next.question);
        lines.push(next.question);
        let live = self.session.is_live();
        self.arbiter.say(lines, live);
    }

    /// Enter Summary. Both voice channels close and the deadline stops.
    fn finish(&mut self, summary: String) {
        let from = self.session.stage();
        self.deadline.clear();
        self.arbiter.silence();
        self.session.complete(summary.clone());

        self.emit(StateEvent::DeadlineTick {
            remaining_seconds: 0,
            total_seconds: self.deadline.total_seconds(),
        });
        self.transition(from, Stage::Summary);
        self.emit(StateEvent::InterviewCompleted { summary });
    }

    fn arm_deadline(&mut self, total_seconds: u32) {
        self.deadline.start(total_seconds);
        self.emit(StateEvent::DeadlineTick {
            remaining_seconds: total_seconds,
            total_seconds,
        });
    }

    fn transition(&mut self, from: Stage, to: Stage) {
        let duration_ms = self.stage_entered_at.elapsed().as_millis() as u64;
        info!(from = %from, to = %to, duration_ms, "stage transition");
        self.stage_entered_at = Instant::now();
        self.emit(StateEvent::StageChanged { from, to });
    }

    fn append_turn(&mut self, speaker: Speaker, text: &str) {
        self.session.append(speaker, text);
        self.emit(StateEvent::TurnAppended {
            speaker,
            text: text.to_string(),
        });
    }

    fn alert(&mut self, message: String) {
        self.emit(StateEvent::Alert { message });
    }

    fn emit_answer(&mut self) {
        let text = self.session.pending_answer().to_string();
        self.emit(StateEvent::AnswerUpdated { text });
    }

    fn emit(&self, event: StateEvent) {
        debug!(%event, "emitting event");
        // No subscribers is fine
        let _ = self.notify.send(event);
    }

    fn publish_voice(&mut self) {
        let now = self.arbiter.channel_state();
        let before = self.published_voice;
        if now.listening_enabled != before.listening_enabled {
            self.emit(StateEvent::AutoListenChanged {
                enabled: now.listening_enabled,
            });
        }
        if now.is_capturing != before.is_capturing {
            self.emit(StateEvent::ListeningChanged {
                capturing: now.is_capturing,
            });
        }
        if now.is_speaking != before.is_speaking {
            self.emit(StateEvent::SpeakingChanged {
                speaking: now.is_speaking,
            });
        }
        self.published_voice = now;
    }

    fn publish_snapshot(&self) {
        let voice = self.arbiter.channel_state();
        let can_submit = self.accepting_answer()
            && self.in_flight.is_none()
            && !self.session.pending_answer().trim().is_empty();

        self.snapshot.send_replace(SessionSnapshot {
            stage: self.session.stage(),
            current_question: self.session.current_question().to_string(),
            question_number: self.session.question_number(),
            planned_questions: self.voice.planned_questions,
            pending_answer: self.session.pending_answer().to_string(),
            transcript: self.session.transcript().to_vec(),
            summary: self.session.summary().map(str::to_string),
            completed: self.session.completed(),
            remaining_seconds: self.deadline.remaining_seconds(),
            total_seconds: self.deadline.total_seconds(),
            deadline_expired: self.deadline.is_expired(),
            auto_listen: voice.listening_enabled,
            capturing: voice.is_capturing,
            speaking: voice.is_speaking,
            arbiter: self.arbiter.state(),
            capture_supported: self.arbiter.capture().is_supported(),
            playback_supported: self.arbiter.playback().is_supported(),
            request_in_flight: self.in_flight.is_some(),
            can_submit,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::voice::{FakeCapture, FakeSpeech};

    /// Replies are popped in order; an empty queue is a 503
    #[derive(Default)]
    struct ScriptedService {
        starts: Mutex<VecDeque<Result<StartReply, ServiceError>>>,
        answers: Mutex<VecDeque<Result<AnswerReply, ServiceError>>>,
        timeouts: Mutex<VecDeque<Result<TimeoutReply, ServiceError>>>,
        answer_delay: Mutex<Duration>,
        submitted: Mutex<Vec<String>>,
        timeout_calls: Mutex<u32>,
    }

    fn unavailable<T>() -> Result<T, ServiceError> {
        Err(ServiceError::Status {
            status: 503,
            body: "no scripted reply".into(),
        })
    }

    #[async_trait]
    impl InterviewService for ScriptedService {
        async fn start(&self) -> Result<StartReply, ServiceError> {
            let next = self.starts.lock().unwrap().pop_front();
            next.unwrap_or_else(unavailable)
        }

        async fn answer(&self, answer: &str) -> Result<AnswerReply, ServiceError> {
            self.submitted.lock().unwrap().push(answer.to_string());
            let delay = *self.answer_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let next = self.answers.lock().unwrap().pop_front();
            next.unwrap_or_else(unavailable)
        }

        async fn timeout(&self) -> Result<TimeoutReply, ServiceError> {
            *self.timeout_calls.lock().unwrap() += 1;
            let next = self.timeouts.lock().unwrap().pop_front();
            next.unwrap_or_else(unavailable)
        }
    }

    fn start_reply(timer: u32) -> StartReply {
        StartReply {
            intro: "Hi".into(),
            question: "Q1".into(),
            timer,
        }
    }

    fn next_reply(feedback: &str, question: &str, timer: u32) -> AnswerReply {
        AnswerReply {
            feedback: feedback.into(),
            completed: false,
            question: Some(question.into()),
            timer: Some(timer),
            summary: None,
        }
    }

    struct Harness {
        ctl: SessionController,
        rx: mpsc::UnboundedReceiver<Event>,
        notes: broadcast::Receiver<StateEvent>,
        service: Arc<ScriptedService>,
        capture: FakeCapture,
        speech: FakeSpeech,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_speech(FakeSpeech::default())
        }

        fn with_speech(speech: FakeSpeech) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let (notify, notes) = broadcast::channel(1024);
            let service = Arc::new(ScriptedService::default());
            let capture = FakeCapture::default();
            let ctl = SessionController::new(
                service.clone(),
                Box::new(capture.clone()),
                Box::new(speech.clone()),
                VoiceConfig::default(),
                tx,
                notify,
            );
            Self {
                ctl,
                rx,
                notes,
                service,
                capture,
                speech,
            }
        }

        fn command(&mut self, command: Command) {
            self.ctl.handle(Event::Command(command));
            self.assert_exclusive();
        }

        fn signal(&mut self, signal: CaptureSignal) {
            let activation = self.ctl.arbiter().capture().activation();
            self.ctl.handle(Event::Capture { activation, signal });
            self.assert_exclusive();
        }

        fn finish_speech(&mut self) {
            let utterance = self.speech.last_id().unwrap();
            self.ctl.handle(Event::SpeechEnded { utterance });
            self.assert_exclusive();
        }

        /// Let spawned tasks run and feed everything they posted back in
        async fn pump(&mut self) {
            for _ in 0..5 {
                tokio::task::yield_now().await;
                while let Ok(event) = self.rx.try_recv() {
                    self.ctl.handle(event);
                    self.assert_exclusive();
                }
            }
        }

        /// Advance paused time in 100ms steps, pumping after each
        async fn advance(&mut self, ms: u64) {
            for _ in 0..ms / 100 {
                tokio::time::sleep(Duration::from_millis(100)).await;
                self.pump().await;
            }
        }

        /// Start an interview and play the intro and first question through
        async fn start_listening(&mut self, timer: u32) {
            self.service.starts.lock().unwrap().push_back(Ok(start_reply(timer)));
            self.command(Command::StartInterview);
            self.pump().await;
            self.finish_speech();
            self.advance(700).await;
            self.finish_speech();
            self.advance(1100).await;
            self.signal(CaptureSignal::Started);
            assert!(self.ctl.arbiter().capture().is_capturing());
        }

        fn drain_notes(&mut self) -> Vec<StateEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.notes.try_recv() {
                out.push(event);
            }
            out
        }

        fn speakers(&self) -> Vec<Speaker> {
            self.ctl.session().transcript().iter().map(|t| t.speaker).collect()
        }

        fn assert_exclusive(&self) {
            let state = self.ctl.arbiter().channel_state();
            assert!(
                !(state.is_capturing && state.is_speaking),
                "capture and playback both open"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_interview_enters_interview() {
        let mut h = Harness::new();
        h.service.starts.lock().unwrap().push_back(Ok(start_reply(60)));

        h.command(Command::StartInterview);
        h.pump().await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Interview);
        assert_eq!(session.current_question(), "Q1");
        assert_eq!(session.question_number(), 1);
        assert_eq!(h.ctl.deadline().remaining_seconds(), 60);
        assert_eq!(h.speakers(), vec![Speaker::Interviewer, Speaker::Interviewer]);
        assert_eq!(h.speech.texts(), vec!["Hi".to_string()]);

        let notes = h.drain_notes();
        assert!(notes.contains(&StateEvent::StageChanged {
            from: Stage::Intro,
            to: Stage::Interview
        }));
        assert!(notes.contains(&StateEvent::DeadlineTick {
            remaining_seconds: 60,
            total_seconds: 60
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_question_is_spoken_after_intro_then_capture_arms() {
        let mut h = Harness::new();
        h.service.starts.lock().unwrap().push_back(Ok(start_reply(60)));
        h.command(Command::StartInterview);
        h.pump().await;

        h.finish_speech();
        h.advance(700).await;
        assert_eq!(h.speech.texts(), vec!["Hi".to_string(), "Q1".to_string()]);
        assert_eq!(h.capture.start_count(), 0);

        h.finish_speech();
        h.advance(1100).await;
        assert_eq!(h.capture.start_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_stays_in_intro() {
        let mut h = Harness::new();
        h.command(Command::StartInterview);
        h.pump().await;

        assert_eq!(h.ctl.session().stage(), Stage::Intro);
        let notes = h.drain_notes();
        assert!(notes
            .iter()
            .any(|e| matches!(e, StateEvent::Alert { message } if message.starts_with("Error starting interview"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_advances_to_next_question() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.signal(CaptureSignal::Transcript("VLOOKUP finds values".into()));
        h.signal(CaptureSignal::Ended);
        assert_eq!(h.ctl.session().pending_answer(), "VLOOKUP finds values");

        h.service
            .answers
            .lock()
            .unwrap()
            .push_back(Ok(next_reply("Good", "Q2", 90)));
        h.command(Command::SubmitAnswer);
        h.pump().await;

        let session = h.ctl.session();
        assert_eq!(session.current_question(), "Q2");
        assert_eq!(session.question_number(), 2);
        assert_eq!(session.pending_answer(), "");
        assert_eq!(session.last_feedback(), "Good");
        assert_eq!(session.answered(), 1);
        assert_eq!(h.ctl.deadline().remaining_seconds(), 90);
        assert_eq!(
            h.service.submitted.lock().unwrap().clone(),
            vec!["VLOOKUP finds values".to_string()]
        );
        assert_eq!(h.speech.texts().last().map(String::as_str), Some("Good"));

        h.finish_speech();
        h.advance(700).await;
        assert_eq!(h.speech.texts().last().map(String::as_str), Some("Q2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_ignored_when_empty() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.command(Command::UpdateAnswer { text: "   ".into() });
        h.command(Command::SubmitAnswer);
        h.pump().await;

        assert!(h.service.submitted.lock().unwrap().is_empty());
        assert!(!h.ctl.snapshots().borrow().can_submit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure_keeps_answer() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.command(Command::UpdateAnswer {
            text: "=SUM(A1:A10)".into(),
        });
        h.service.answers.lock().unwrap().push_back(Err(ServiceError::Status {
            status: 500,
            body: "boom".into(),
        }));

        h.command(Command::SubmitAnswer);
        h.pump().await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Interview);
        assert_eq!(session.pending_answer(), "=SUM(A1:A10)");
        assert_eq!(session.current_question(), "Q1");
        assert_eq!(session.answered(), 0);
        let notes = h.drain_notes();
        assert!(notes
            .iter()
            .any(|e| matches!(e, StateEvent::Alert { message } if message.starts_with("Error submitting answer"))));

        // Listening comes back once the stopped capture lets go
        assert_eq!(h.capture.start_count(), 1);
        h.advance(1500).await;
        h.signal(CaptureSignal::Ended);
        h.advance(1100).await;
        assert!(h.ctl.arbiter().auto_listen());
        assert_eq!(h.capture.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_on_before_capture_ends_resumes_listening() {
        let mut h = Harness::new();
        h.start_listening(60).await;

        h.command(Command::ToggleAutoListen);
        h.command(Command::ToggleAutoListen);
        assert!(h.ctl.arbiter().auto_listen());
        assert_eq!(h.capture.start_count(), 1);

        h.signal(CaptureSignal::Ended);
        h.advance(1100).await;
        assert_eq!(h.capture.start_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_reply_without_question_is_an_error() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.command(Command::UpdateAnswer { text: "x".into() });
        h.service.answers.lock().unwrap().push_back(Ok(AnswerReply {
            feedback: "Good".into(),
            completed: false,
            question: None,
            timer: None,
            summary: None,
        }));

        h.command(Command::SubmitAnswer);
        h.pump().await;

        assert_eq!(h.ctl.session().pending_answer(), "x");
        assert_eq!(h.ctl.session().current_question(), "Q1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_answer_enters_summary() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.signal(CaptureSignal::Ended);
        h.command(Command::UpdateAnswer { text: "last".into() });
        h.service.answers.lock().unwrap().push_back(Ok(AnswerReply {
            feedback: "Well done".into(),
            completed: true,
            question: None,
            timer: None,
            summary: Some("Strong Excel skills".into()),
        }));

        h.command(Command::SubmitAnswer);
        h.pump().await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Summary);
        assert!(session.completed());
        assert_eq!(session.summary(), Some("Strong Excel skills"));
        assert!(!h.ctl.arbiter().auto_listen());
        assert!(!h.ctl.deadline().is_armed());
        assert_eq!(h.speech.texts().last().map(String::as_str), Some("Well done"));

        // Feedback ends without re-arming capture
        let starts = h.capture.start_count();
        h.finish_speech();
        h.advance(3000).await;
        assert_eq!(h.capture.start_count(), starts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_completes_interview() {
        let mut h = Harness::new();
        h.start_listening(3).await;
        h.service.timeouts.lock().unwrap().push_back(Ok(TimeoutReply {
            completed: true,
            feedback: None,
            question: None,
            timer: None,
            summary: Some("Great job".into()),
        }));

        h.advance(1500).await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Summary);
        assert_eq!(session.summary(), Some("Great job"));
        assert_eq!(
            session.transcript().last().map(|t| t.text.as_str()),
            Some(TIME_EXPIRED_END)
        );
        assert_eq!(h.ctl.deadline().remaining_seconds(), 0);
        assert!(!h.ctl.arbiter().auto_listen());
        h.signal(CaptureSignal::Ended);
        assert!(!h.ctl.arbiter().capture().is_active());
        assert!(!h.ctl.arbiter().playback().is_speaking());

        let notes = h.drain_notes();
        assert!(notes.contains(&StateEvent::DeadlineExpired));
        assert!(notes.contains(&StateEvent::InterviewCompleted {
            summary: "Great job".into()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_moves_to_next_question() {
        let mut h = Harness::new();
        h.start_listening(3).await;
        h.command(Command::UpdateAnswer {
            text: "half an answer".into(),
        });
        h.service.timeouts.lock().unwrap().push_back(Ok(TimeoutReply {
            completed: false,
            feedback: Some("Out of time".into()),
            question: Some("Q2".into()),
            timer: Some(45),
            summary: None,
        }));

        h.advance(1500).await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Interview);
        assert_eq!(session.current_question(), "Q2");
        assert_eq!(session.pending_answer(), "");
        assert!(session
            .transcript()
            .iter()
            .any(|t| t.speaker == Speaker::System && t.text == TIME_EXPIRED_NEXT));
        assert!(h.ctl.deadline().is_armed());
        assert!(!h.ctl.deadline().is_expired());
        // Auto-listen stays off until the user turns it back on
        assert!(!h.ctl.arbiter().auto_listen());

        // Feedback waits for capture to release the device
        assert_eq!(h.speech.texts().last().map(String::as_str), Some("Q1"));
        h.signal(CaptureSignal::Ended);
        assert_eq!(h.speech.texts().last().map(String::as_str), Some("Out of time"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_failure_forces_summary() {
        let mut h = Harness::new();
        h.start_listening(2).await;

        h.advance(500).await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Summary);
        assert_eq!(session.summary(), Some(TIMEOUT_FALLBACK_SUMMARY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wins_race_with_slow_submit() {
        let mut h = Harness::new();
        h.start_listening(3).await;
        *h.service.answer_delay.lock().unwrap() = Duration::from_secs(5);
        h.service
            .answers
            .lock()
            .unwrap()
            .push_back(Ok(next_reply("Late", "Q-late", 30)));
        h.service.timeouts.lock().unwrap().push_back(Ok(TimeoutReply {
            completed: false,
            feedback: None,
            question: Some("Q2".into()),
            timer: Some(60),
            summary: None,
        }));

        h.command(Command::UpdateAnswer { text: "x".into() });
        h.command(Command::SubmitAnswer);
        h.pump().await;
        h.advance(1500).await;
        assert_eq!(h.ctl.session().current_question(), "Q2");

        // The answer reply lands after the timeout already advanced
        h.advance(5000).await;

        let session = h.ctl.session();
        assert_eq!(session.current_question(), "Q2");
        assert_eq!(session.question_number(), 2);
        assert_eq!(session.answered(), 0);
        assert!(!session.transcript().iter().any(|t| t.text == "Late"));
        assert_eq!(*h.service.timeout_calls.lock().unwrap(), 1);
        let remaining = h.ctl.deadline().remaining_seconds();
        assert!(remaining > 50 && remaining < 60, "remaining {remaining}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_rejected_after_expiry() {
        let mut h = Harness::new();
        h.start_listening(2).await;
        h.command(Command::UpdateAnswer { text: "x".into() });

        // Expire but leave the timeout reply unread
        tokio::time::sleep(Duration::from_millis(300)).await;
        while let Ok(event) = h.rx.try_recv() {
            if matches!(event, Event::TimerTick { .. }) {
                h.ctl.handle(event);
            }
        }
        assert!(h.ctl.deadline().is_expired());

        h.command(Command::SubmitAnswer);
        assert!(h.service.submitted.lock().unwrap().is_empty());
        assert!(h.ctl.snapshots().borrow().request_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_off_mid_listening_stops_restarts() {
        let mut h = Harness::new();
        h.start_listening(60).await;

        h.command(Command::ToggleAutoListen);
        assert!(!h.ctl.arbiter().auto_listen());
        assert_eq!(h.capture.stop_count(), 1);
        h.signal(CaptureSignal::Ended);

        let starts = h.capture.start_count();
        h.command(Command::ReadAloud { index: 1 });
        assert_eq!(h.speech.texts().last().map(String::as_str), Some("Q1"));
        h.finish_speech();
        h.advance(3000).await;
        assert_eq!(h.capture.start_count(), starts);

        let notes = h.drain_notes();
        assert!(notes.contains(&StateEvent::AutoListenChanged { enabled: false }));
        assert!(notes.contains(&StateEvent::ListeningChanged { capturing: false }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_once_while_auto_listen_off() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.command(Command::ToggleAutoListen);
        h.signal(CaptureSignal::Ended);

        let starts = h.capture.start_count();
        h.command(Command::CaptureOnce);
        assert_eq!(h.capture.start_count(), starts + 1);
        h.signal(CaptureSignal::Started);
        h.signal(CaptureSignal::Transcript("INDEX MATCH".into()));
        h.signal(CaptureSignal::Ended);
        h.advance(2000).await;

        assert_eq!(h.ctl.session().pending_answer(), "INDEX MATCH");
        assert_eq!(h.capture.start_count(), starts + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_start_cuts_off_read_aloud() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.signal(CaptureSignal::Ended);
        h.advance(1100).await;

        h.command(Command::ReadAloud { index: 0 });
        assert!(h.ctl.arbiter().playback().is_speaking() || h.ctl.arbiter().capture().is_active());
        h.signal(CaptureSignal::Ended);
        assert!(h.ctl.arbiter().playback().is_speaking());

        h.command(Command::ToggleAutoListen);
        h.command(Command::CaptureOnce);
        h.signal(CaptureSignal::Started);
        assert!(!h.ctl.arbiter().playback().is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_aloud_only_interviewer_turns() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        let spoken = h.speech.texts().len();

        h.command(Command::ReadAloud { index: 42 });
        assert_eq!(h.speech.texts().len(), spoken);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_does_not_tick_in_summary() {
        let mut h = Harness::new();
        h.start_listening(60).await;
        h.command(Command::UpdateAnswer { text: "x".into() });
        h.service.answers.lock().unwrap().push_back(Ok(AnswerReply {
            feedback: "Bye".into(),
            completed: true,
            question: None,
            timer: None,
            summary: None,
        }));
        h.command(Command::SubmitAnswer);
        h.pump().await;
        assert_eq!(h.ctl.session().summary(), Some(COMPLETED_FALLBACK_SUMMARY));

        h.drain_notes();
        h.advance(3000).await;
        let notes = h.drain_notes();
        assert!(!notes.iter().any(|e| matches!(e, StateEvent::DeadlineTick { .. })));
        assert_eq!(h.ctl.deadline().remaining_seconds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_summary_resets_session() {
        let mut h = Harness::new();
        h.start_listening(2).await;
        h.advance(500).await;
        assert_eq!(h.ctl.session().stage(), Stage::Summary);

        h.service.starts.lock().unwrap().push_back(Ok(start_reply(60)));
        h.command(Command::StartInterview);
        h.pump().await;

        let session = h.ctl.session();
        assert_eq!(session.stage(), Stage::Interview);
        assert!(!session.completed());
        assert_eq!(session.transcript().len(), 2);
        assert!(h.ctl.arbiter().auto_listen());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_tracks_session() {
        let mut h = Harness::new();
        let snapshots = h.ctl.snapshots();
        assert_eq!(snapshots.borrow().stage, Stage::Intro);

        h.start_listening(60).await;
        h.signal(CaptureSignal::Transcript("pivot tables".into()));

        let snapshot = snapshots.borrow().clone();
        assert_eq!(snapshot.stage, Stage::Interview);
        assert_eq!(snapshot.question_number, 1);
        assert_eq!(snapshot.planned_questions, 6);
        assert_eq!(snapshot.pending_answer, "pivot tables");
        assert!(snapshot.capturing);
        assert!(!snapshot.speaking);
        assert!(snapshot.can_submit);
        assert!(snapshot.capture_supported && snapshot.playback_supported);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_playback_capture_arms_right_away() {
        let speech = FakeSpeech {
            unavailable: true,
            ..FakeSpeech::default()
        };
        let mut h = Harness::with_speech(speech);
        h.service.starts.lock().unwrap().push_back(Ok(start_reply(60)));
        h.command(Command::StartInterview);
        h.pump().await;
        h.advance(1100).await;

        assert!(h.speech.texts().is_empty());
        assert_eq!(h.capture.start_count(), 1);
        assert_eq!(h.ctl.session().transcript().len(), 2);
    }
}
