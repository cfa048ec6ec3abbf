use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.origin + offset
    }
}

/// Active-time accounting: wall-clock elapsed minus the sum of paused
/// intervals. Once frozen, the reading never changes.
#[derive(Debug, Clone, Default)]
pub struct ActiveTimer {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    frozen: Option<Duration>,
}

impl ActiveTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: Instant) {
        if self.started.is_none() {
            self.started = Some(now);
        }
    }

    pub fn pause(&mut self, now: Instant) {
        if self.started.is_some() && self.paused_at.is_none() && self.frozen.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn active_elapsed(&self, now: Instant) -> Duration {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        let end = self.paused_at.unwrap_or(now);
        end.saturating_duration_since(started)
            .saturating_sub(self.paused_total)
    }

    /// Stop the timer for good and return the final active time.
    pub fn freeze(&mut self, now: Instant) -> Duration {
        let elapsed = self.active_elapsed(now);
        self.frozen = Some(elapsed);
        elapsed
    }
}

/// Whole seconds, rounded to nearest.
pub fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs_f64().round() as u64
}
