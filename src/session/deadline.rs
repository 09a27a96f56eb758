//! Per-question countdown
//!
//! A spawned ticker posts [`Event::TimerTick`] once per second. Ticks carry the
//! generation they were armed under, so ticks from a cancelled or re-armed
//! deadline are ignored even if they were already queued.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::events::Event;

const TICK: Duration = Duration::from_secs(1);

/// Result of applying one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Tick from a cancelled or superseded arming
    Stale,
    /// Session not live, countdown held
    Held,
    /// Decremented; seconds remaining
    Ticked(u32),
    /// Reached zero; reported exactly once per arming
    Expired,
}

/// Countdown state plus the task that drives it
pub struct Deadline {
    total_seconds: u32,
    remaining_seconds: u32,
    generation: u64,
    armed: bool,
    expired: bool,
    ticker: Option<JoinHandle<()>>,
    events: mpsc::UnboundedSender<Event>,
}

impl Deadline {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            total_seconds: 0,
            remaining_seconds: 0,
            generation: 0,
            armed: false,
            expired: false,
            ticker: None,
            events,
        }
    }

    pub fn total_seconds(&self) -> u32 {
        self.total_seconds
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    /// Arm for a new question, replacing any previous countdown
    pub fn start(&mut self, total_seconds: u32) {
        self.stop_ticker();
        self.generation += 1;
        self.total_seconds = total_seconds;
        self.remaining_seconds = total_seconds;
        self.armed = true;
        self.expired = false;

        let generation = self.generation;
        let events = self.events.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + TICK, TICK);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if events.send(Event::TimerTick { generation }).is_err() {
                    break;
                }
            }
        }));

        debug!(total_seconds, generation, "deadline armed");
    }

    /// Stop without firing expiry. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if self.armed {
            debug!(remaining = self.remaining_seconds, "deadline cancelled");
        }
        self.stop_ticker();
        self.armed = false;
        self.generation += 1;
    }

    /// Disarm and zero the display once the session has finished
    pub fn clear(&mut self) {
        self.cancel();
        self.remaining_seconds = 0;
    }

    /// Apply a tick; `live` is whether the session is in a ticking stage
    pub fn tick(&mut self, generation: u64, live: bool) -> TickOutcome {
        if !self.armed || generation != self.generation {
            return TickOutcome::Stale;
        }
        if !live {
            return TickOutcome::Held;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);
        if self.remaining_seconds == 0 {
            self.stop_ticker();
            self.armed = false;
            self.expired = true;
            TickOutcome::Expired
        } else {
            TickOutcome::Ticked(self.remaining_seconds)
        }
    }

    fn stop_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
