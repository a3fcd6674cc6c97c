// Playback clock used to pace the null sink

use std::time::{Duration, Instant};

/// Media-time clock driven by the wall clock and a rate multiplier.
///
/// Owned by a single playback thread, so no locking.
#[derive(Debug)]
pub struct PlaybackClock {
    base_ms: i64,
    base_instant: Instant,
    rate: f64,
    paused: bool,
    paused_at_ms: i64,
}

impl PlaybackClock {
    /// A paused clock at position 0
    pub fn new(rate: f64) -> Self {
        Self {
            base_ms: 0,
            base_instant: Instant::now(),
            rate,
            paused: true,
            paused_at_ms: 0,
        }
    }

    /// Current media time in milliseconds
    pub fn now_ms(&self) -> i64 {
        if self.paused {
            self.paused_at_ms
        } else {
            let elapsed = self.base_instant.elapsed().as_secs_f64() * 1000.0;
            self.base_ms + (elapsed * self.rate) as i64
        }
    }

    pub fn set_time(&mut self, ms: i64) {
        self.base_ms = ms;
        self.base_instant = Instant::now();
        self.paused_at_ms = ms;
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.base_ms = self.paused_at_ms;
            self.base_instant = Instant::now();
            self.paused = false;
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused_at_ms = self.now_ms();
            self.paused = true;
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Wall time until media time reaches `target_ms`; zero if already there
    pub fn wall_time_until(&self, target_ms: i64) -> Duration {
        let ahead = target_ms - self.now_ms();
        if ahead <= 0 || self.paused {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(ahead as f64 / 1000.0 / self.rate)
    }
}
