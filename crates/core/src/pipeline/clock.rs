use std::{
    thread,
    time::{Duration, Instant},
};

/// One render tick as reported by [`RenderClock::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTick {
    pub index: u64,
    /// Time since the first tick.
    pub time: Duration,
    /// Time since the previous tick.
    pub dt: Duration,
}

/// Fixed-rate ticker. A late tick does not cause a burst of catch-up ticks;
/// the missed deadlines are skipped and counted.
#[derive(Debug)]
pub struct RenderClock {
    interval: Duration,
    start: Option<Instant>,
    next: Option<Instant>,
    index: u64,
    last: Duration,
    skipped: u64,
}

impl RenderClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            start: None,
            next: None,
            index: 0,
            last: Duration::ZERO,
            skipped: 0,
        }
    }

    /// Deadlines missed so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Sleeps until the next deadline and returns the tick.
    pub fn wait(&mut self) -> ClockTick {
        let now = Instant::now();
        let start = *self.start.get_or_insert(now);
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        let woke = Instant::now().max(deadline);

        let late = woke.saturating_duration_since(deadline);
        let missed = (late.as_nanos() / self.interval.as_nanos()) as u64;
        if missed > 0 {
            self.skipped += missed;
            tracing::trace!(missed, "render clock skipped deadlines");
        }
        self.next = Some(deadline + self.interval * (missed as u32 + 1));

        let time = woke - start;
        let tick = ClockTick {
            index: self.index,
            time,
            dt: time.saturating_sub(self.last),
        };
        self.index += 1;
        self.last = time;
        tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_are_spaced_by_the_interval() {
        let mut clock = RenderClock::new(Duration::from_millis(10));
        let first = clock.wait();
        assert_eq!(first.index, 0);
        assert_eq!(first.dt, Duration::ZERO);

        let started = Instant::now();
        for _ in 0..5 {
            clock.wait();
        }
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn stalls_skip_instead_of_bursting() {
        let mut clock = RenderClock::new(Duration::from_millis(10));
        clock.wait();
        thread::sleep(Duration::from_millis(55));
        let late = clock.wait();
        assert_eq!(late.index, 1);
        assert!(clock.skipped() >= 3);
        assert!(late.dt >= Duration::from_millis(50));
        // The next deadline lies after the stall, not back inside it.
        let stalled_until = clock.start.unwrap() + Duration::from_millis(55);
        assert!(clock.next.unwrap() > stalled_until);
    }
}
