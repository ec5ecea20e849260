use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Doubling retry delay capped at `max`.
pub struct Backoff {
    delay: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { delay: base, max }
    }

    /// Returns the current delay and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(self.max);
        delay
    }

    pub async fn wait(&mut self) {
        sleep(self.next_delay()).await;
    }
}

/// Fixed-interval schedule with a hard deadline. Once the next tick would
/// cross the deadline the schedule refuses to sleep again, so a caller
/// looping on `wait_next` stops at the deadline exactly.
pub struct PollSchedule {
    interval: Duration,
    deadline: Duration,
    started: Instant,
}

impl PollSchedule {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sleeps until the next tick, or returns false without sleeping when
    /// the tick would land past the deadline.
    pub async fn wait_next(&self) -> bool {
        if self.started.elapsed() + self.interval > self.deadline {
            return false;
        }
        sleep(self.interval).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_advances_by_the_doubling_delays() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let started = Instant::now();
        backoff.wait().await;
        backoff.wait().await;
        backoff.wait().await;
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_schedule_stops_at_the_deadline() {
        let schedule = PollSchedule::new(Duration::from_secs(3), Duration::from_secs(300));
        let mut ticks = 0u32;
        while schedule.wait_next().await {
            ticks += 1;
        }
        assert_eq!(ticks, 100);
        assert_eq!(schedule.elapsed(), Duration::from_secs(300));
        assert!(!schedule.wait_next().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_schedule_never_overshoots() {
        let schedule = PollSchedule::new(Duration::from_secs(3), Duration::from_secs(7));
        let mut ticks = 0u32;
        while schedule.wait_next().await {
            ticks += 1;
        }
        assert_eq!(ticks, 2);
        assert_eq!(schedule.elapsed(), Duration::from_secs(6));
    }
}
