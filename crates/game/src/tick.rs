//! The fixed-timestep tick timer.
//!
//! Both the server simulation and the client sim loop run off one of
//! these: accumulate wall-clock time, consume whole timesteps as ticks,
//! sleep off the remainder.

use std::time::{Duration, Instant};

use crate::config::SIM_DELAYED_TIME_S;

pub struct TickTimer {
    timestep: Duration,
    last_time: Instant,
    accumulator: Duration,
}

impl TickTimer {
    pub fn new(timestep: Duration) -> Self {
        Self {
            timestep,
            last_time: Instant::now(),
            accumulator: Duration::ZERO,
        }
    }

    pub fn from_seconds(timestep_s: f64) -> Self {
        Self::new(Duration::from_secs_f64(timestep_s))
    }

    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    /// Adds the wall-clock time since the last call to the accumulator.
    /// Warns when an iteration ran long enough to delay the tick.
    pub fn update(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_time;
        self.last_time = now;
        self.accumulator += delta;

        let delayed_threshold =
            self.timestep + Duration::from_secs_f64(SIM_DELAYED_TIME_S);
        if delta > delayed_threshold {
            log::warn!(
                "tick iteration ran long: {:.3}ms (timestep {:.3}ms)",
                delta.as_secs_f64() * 1000.0,
                self.timestep.as_secs_f64() * 1000.0
            );
        }
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.timestep
    }

    /// Consumes one timestep from the accumulator if available.
    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.timestep {
            self.accumulator -= self.timestep;
            true
        } else {
            false
        }
    }

    /// Progress through the current tick, in [0, 1). The renderer uses this
    /// to interpolate between previous and current positions.
    pub fn alpha(&self) -> f32 {
        (self.accumulator.as_secs_f64() / self.timestep.as_secs_f64()).min(1.0) as f32
    }

    /// How long to sleep before the next tick is due.
    pub fn time_until_next_tick(&self) -> Duration {
        self.timestep.saturating_sub(self.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulated_time_yields_ticks() {
        let mut timer = TickTimer::from_seconds(1.0 / 60.0);
        timer.accumulator = Duration::from_secs_f64(2.5 / 60.0);

        assert!(timer.should_tick());
        assert!(timer.consume_tick());
        assert!(timer.consume_tick());
        assert!(!timer.consume_tick());
        assert!(timer.alpha() > 0.4 && timer.alpha() < 0.6);
    }

    #[test]
    fn sleep_hint_covers_the_remainder() {
        let mut timer = TickTimer::from_seconds(1.0 / 30.0);
        timer.accumulator = Duration::from_secs_f64(1.0 / 60.0);
        let remaining = timer.time_until_next_tick();
        assert!(remaining <= Duration::from_secs_f64(1.0 / 60.0));
        assert!(remaining > Duration::from_secs_f64(1.0 / 120.0));
    }
}
