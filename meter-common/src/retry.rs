use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;

/// The delays between delivery attempts used by the agent unless configured otherwise.
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// A fixed retry schedule.
///
/// Each call to [`next_backoff`](Backoff::next_backoff) yields the next configured delay until the
/// schedule is exhausted, after which it yields `None`. A schedule with `n` delays therefore allows
/// `n + 1` attempts in total.
///
/// ```
/// use std::time::Duration;
/// use backoff::backoff::Backoff;
/// use meter_common::RetrySchedule;
///
/// let mut schedule = RetrySchedule::new([Duration::from_millis(10)]);
/// assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(10)));
/// assert_eq!(schedule.next_backoff(), None);
/// ```
#[derive(Clone, Debug)]
pub struct RetrySchedule {
    delays: Arc<[Duration]>,
    attempt: usize,
}

impl RetrySchedule {
    /// Creates a schedule from the given delays.
    pub fn new(delays: impl Into<Vec<Duration>>) -> Self {
        let delays: Vec<Duration> = delays.into();
        Self {
            delays: delays.into(),
            attempt: 0,
        }
    }

    /// The number of retries that have been handed out so far.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// The total number of attempts this schedule allows, including the first one.
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAYS)
    }
}

impl Backoff for RetrySchedule {
    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.delays.get(self.attempt).copied()?;
        self.attempt += 1;
        Some(delay)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_default_schedule() {
        let mut schedule = RetrySchedule::default();
        assert_eq!(schedule.max_attempts(), 4);
        assert_eq!(schedule.attempt(), 0);

        let delays: Vec<_> = std::iter::from_fn(|| schedule.next_backoff()).collect();
        assert_eq!(delays, DEFAULT_RETRY_DELAYS.to_vec());
        assert_eq!(schedule.attempt(), 3);
        assert_eq!(schedule.next_backoff(), None);
    }

    #[test]
    fn test_reset() {
        let mut schedule = RetrySchedule::new([Duration::from_secs(2)]);
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.attempt(), 1);
        schedule.reset();
        assert_eq!(schedule.attempt(), 0);
        assert_eq!(schedule.next_backoff(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_empty_schedule() {
        let mut schedule = RetrySchedule::new(Vec::new());
        assert_eq!(schedule.max_attempts(), 1);
        assert_eq!(schedule.next_backoff(), None);
    }

    #[test]
    fn test_clone_keeps_position() {
        let mut first = RetrySchedule::default();
        first.next_backoff();
        let mut second = first.clone();
        assert_eq!(second.attempt(), 1);
        assert_eq!(second.next_backoff(), Some(Duration::from_secs(3)));
        assert_eq!(first.next_backoff(), Some(Duration::from_secs(3)));
    }
}
