//! Event timestamps and gesture pacing

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Below this, `wait_until` spins instead of asking the scheduler to sleep
const SPIN_THRESHOLD: Duration = Duration::from_millis(2);

/// Monotonic event timestamp in nanoseconds since the first call in this process
pub fn timestamp_now() -> u64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Sleep until `deadline`, finishing the last stretch with a spin so phase
/// spacing does not inherit scheduler granularity
pub fn sleep_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN_THRESHOLD {
            std::thread::sleep(remaining - SPIN_THRESHOLD);
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Paces the frames of one gesture against offsets from its start
///
/// Offsets are absolute, so a slow frame does not push back every later one.
#[derive(Debug)]
pub struct Pacer {
    start: Instant,
    last_timestamp: u64,
}

impl Pacer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            last_timestamp: 0,
        }
    }

    /// Block until `offset` after the gesture start
    pub fn wait_until(&self, offset: Duration) {
        sleep_until(self.start + offset);
    }

    /// Strictly increasing timestamp for the next frame of this gesture.
    /// One extra tick is reserved for a trailing liftoff event.
    pub fn next_timestamp(&mut self) -> u64 {
        let ts = timestamp_now().max(self.last_timestamp + 1);
        self.last_timestamp = ts + 1;
        ts
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut pacer = Pacer::start();
        let mut prev = pacer.next_timestamp();
        for _ in 0..100 {
            let ts = pacer.next_timestamp();
            assert!(ts > prev + 1);
            prev = ts;
        }
    }

    #[test]
    fn test_wait_until_reaches_offset() {
        let pacer = Pacer::start();
        pacer.wait_until(Duration::from_millis(15));
        assert!(pacer.elapsed() >= Duration::from_millis(15));
    }
}
