use std::sync::Arc;
use std::time::Duration;

use crate::error::Error;

const STANDARD_SCHEDULE_MS: [u64; 4] = [300, 15_000, 45_000, 80_000];
const SLOW_SCHEDULE_MS: [u64; 4] = [2_000, 20_000, 60_000, 120_000];

/// Fixed, non-decreasing backoff schedule indexed by attempt number.
///
/// Attempt `n` (1-based) waits `delays[n - 1]`; attempts past the end of the
/// schedule are not retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    delays: Arc<[Duration]>,
}

impl RetrySchedule {
    /// 300ms, 15s, 45s, 80s.
    pub fn standard() -> Self {
        Self::from_millis_unchecked(&STANDARD_SCHEDULE_MS)
    }

    /// Slower schedule for failures that tend to persist (dns, timeouts).
    pub fn slow() -> Self {
        Self::from_millis_unchecked(&SLOW_SCHEDULE_MS)
    }

    pub fn new(delays: impl IntoIterator<Item = Duration>) -> Result<Self, Error> {
        let delays: Vec<Duration> = delays.into_iter().collect();
        if delays.is_empty() {
            return Err(Error::invalid_config("retry schedule must not be empty"));
        }
        if delays.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(Error::invalid_config(format!(
                "retry schedule must be non-decreasing: {delays:?}"
            )));
        }
        Ok(Self {
            delays: delays.into(),
        })
    }

    pub fn from_millis(delays_ms: &[u64]) -> Result<Self, Error> {
        Self::new(delays_ms.iter().copied().map(Duration::from_millis))
    }

    fn from_millis_unchecked(delays_ms: &[u64]) -> Self {
        Self {
            delays: delays_ms.iter().copied().map(Duration::from_millis).collect(),
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        attempt
            .checked_sub(1)
            .and_then(|index| self.delays.get(index))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::standard()
    }
}
