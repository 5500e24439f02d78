//! The virtual clock and virtual-time timers.
//!
//! The clock is the source of determinism for the whole capture pipeline:
//! it advances in fixed steps driven by the scheduler loop, never from
//! wall-clock deltas, so the sequence of times presented to media
//! adapters is identical no matter how long each frame takes to render.

use std::time::Instant;

use pagecast_models::time::frame_interval_ms;

/// A simulated time source advanced in fixed steps.
///
/// Invariant: `current_ms() == frame_index() * frame_interval_ms()` at
/// every capture point. The clock is owned exclusively by the capture
/// scheduler and mutated only by its loop.
#[derive(Debug)]
pub struct VirtualClock {
    /// Wall time at construction; informational only, never feeds the
    /// virtual timeline
    started_at: Instant,
    current_ms: f64,
    frame_index: u64,
    frame_interval_ms: f64,
}

impl VirtualClock {
    /// Create a clock ticking at the given frame rate, positioned at 0.
    pub fn new(fps: u32) -> Self {
        Self {
            started_at: Instant::now(),
            current_ms: 0.0,
            frame_index: 0,
            frame_interval_ms: frame_interval_ms(fps),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn current_ms(&self) -> f64 {
        self.current_ms
    }

    /// Index of the next frame to be produced.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Milliseconds between frames.
    pub fn frame_interval_ms(&self) -> f64 {
        self.frame_interval_ms
    }

    /// Wall time elapsed since the clock was created. Used only for
    /// logging; the virtual timeline never reads it.
    pub fn wall_elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Advance one frame. The new time is recomputed from the frame
    /// index rather than accumulated, so repeated advances cannot drift.
    pub fn advance(&mut self) -> f64 {
        self.frame_index += 1;
        self.current_ms = self.frame_index as f64 * self.frame_interval_ms;
        self.current_ms
    }
}

/// A timer callback registered against virtual time.
type TimerCallback = Box<dyn FnMut() + Send>;

struct VirtualTimer {
    due_ms: f64,
    /// Re-arm period for intervals; `None` for one-shot timeouts
    period_ms: Option<f64>,
    callback: TimerCallback,
}

/// Timeout/interval emulation scheduled against the virtual clock.
///
/// In-page code that would normally rely on wall-clock timers registers
/// here instead; callbacks fire when the scheduler advances the clock
/// past their deadline, keeping timer-driven animation deterministic.
#[derive(Default)]
pub struct VirtualTimers {
    timers: Vec<VirtualTimer>,
}

impl VirtualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a one-shot callback `delay_ms` of virtual time from `now_ms`.
    pub fn schedule_timeout(
        &mut self,
        now_ms: f64,
        delay_ms: f64,
        callback: impl FnMut() + Send + 'static,
    ) {
        self.timers.push(VirtualTimer {
            due_ms: now_ms + delay_ms,
            period_ms: None,
            callback: Box::new(callback),
        });
    }

    /// Register a repeating callback every `period_ms` of virtual time.
    ///
    /// A non-positive period cannot re-arm, so it registers as a
    /// one-shot due immediately; otherwise `fire_due` would never
    /// advance past a stuck deadline.
    pub fn schedule_interval(
        &mut self,
        now_ms: f64,
        period_ms: f64,
        callback: impl FnMut() + Send + 'static,
    ) {
        let period = if period_ms > 0.0 {
            Some(period_ms)
        } else {
            None
        };
        self.timers.push(VirtualTimer {
            due_ms: now_ms + period_ms.max(0.0),
            period_ms: period,
            callback: Box::new(callback),
        });
    }

    /// Fire every timer due at or before `now_ms`. Interval timers re-arm;
    /// an interval that fell multiple periods behind fires once per period.
    pub fn fire_due(&mut self, now_ms: f64) {
        let mut i = 0;
        while i < self.timers.len() {
            if self.timers[i].due_ms <= now_ms {
                (self.timers[i].callback)();
                match self.timers[i].period_ms {
                    Some(period) => {
                        self.timers[i].due_ms += period;
                        // Stay on this slot: it may be due again
                    }
                    None => {
                        self.timers.swap_remove(i);
                    }
                }
            } else {
                i += 1;
            }
        }
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
