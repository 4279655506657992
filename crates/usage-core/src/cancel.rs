//! Generation-keyed cancellation for deferred work.
//!
//! A deferred task captures the generation current when it was scheduled.
//! Cancelling bumps the generation, so a task that fires afterwards (even one
//! whose timer already elapsed and whose message is queued) is recognised as
//! stale by the owner and dropped without touching state.
//!
//! Only the owner reads or bumps the counter; tasks carry a plain copy.

/// Monotonic generation counter owned by a single scheduler.
#[derive(Debug, Default)]
pub struct Generation {
    current: u64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// The generation a newly scheduled task should capture.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Invalidate every task scheduled so far. Returns the new generation.
    pub fn bump(&mut self) -> u64 {
        self.current = self.current.wrapping_add(1);
        self.current
    }

    /// Whether a task that captured `generation` may still run.
    pub fn is_current(&self, generation: u64) -> bool {
        self.current == generation
    }
}
