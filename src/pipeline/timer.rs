use std::time::Duration;

/// Cumulative per-frame processing time for the whole process lifetime
#[derive(Debug, Clone, Default)]
pub struct RunningTimer {
    loops: u64,
    total: Duration,
}

impl RunningTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one cycle and return the new average
    pub fn record(&mut self, elapsed: Duration) -> Duration {
        self.loops += 1;
        self.total += elapsed;
        self.average()
    }

    pub fn loops(&self) -> u64 {
        self.loops
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn average(&self) -> Duration {
        if self.loops == 0 {
            return Duration::ZERO;
        }
        // Duration only divides by u32
        Duration::from_secs_f64(self.total.as_secs_f64() / self.loops as f64)
    }

    pub fn average_ms(&self) -> f64 {
        self.average().as_secs_f64() * 1000.0
    }
}
