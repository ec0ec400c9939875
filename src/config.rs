use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::dispatch::DispatchTable;
use crate::error::Error;
use crate::policy::PolicyLimits;
use crate::retry::RetrySchedule;

pub const DEFAULT_MAX_RETRIES: usize = 4;
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_REDIRECTS: usize = 3;

/// Serializable executor settings, e.g. loaded from a JSON config file.
///
/// Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorConfig {
    pub max_retries: usize,
    pub min_wait_ms: u64,
    pub max_redirects: usize,
    pub retry_schedule_ms: Vec<u64>,
    pub slow_retry_schedule_ms: Vec<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let millis = |schedule: RetrySchedule| -> Vec<u64> {
            schedule
                .delays()
                .iter()
                .map(|delay| delay.as_millis() as u64)
                .collect()
        };
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_wait_ms: DEFAULT_MIN_WAIT.as_millis() as u64,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry_schedule_ms: millis(RetrySchedule::standard()),
            slow_retry_schedule_ms: millis(RetrySchedule::slow()),
        }
    }
}

impl ExecutorConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|source| Error::invalid_config(source.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::invalid_config("max_retries must be at least 1"));
        }
        RetrySchedule::from_millis(&self.retry_schedule_ms)?;
        RetrySchedule::from_millis(&self.slow_retry_schedule_ms)?;
        Ok(())
    }

    pub fn limits(&self) -> PolicyLimits {
        PolicyLimits {
            min_wait: Duration::from_millis(self.min_wait_ms),
            max_redirects: self.max_redirects,
        }
    }

    /// The standard table when the schedules are the built-in ones, otherwise
    /// a table of the same shape using these schedules.
    pub fn dispatch_table(&self) -> Result<std::sync::Arc<DispatchTable>> {
        let schedule = RetrySchedule::from_millis(&self.retry_schedule_ms)?;
        let slow_schedule = RetrySchedule::from_millis(&self.slow_retry_schedule_ms)?;
        if schedule == RetrySchedule::standard() && slow_schedule == RetrySchedule::slow() {
            return Ok(DispatchTable::standard());
        }
        Ok(std::sync::Arc::new(DispatchTable::with_schedules(
            schedule,
            slow_schedule,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{DEFAULT_MAX_RETRIES, ExecutorConfig};
    use crate::dispatch::{DispatchKey, DispatchTable};
    use crate::error::ErrorCode;
    use crate::policy::Policy;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            ExecutorConfig::from_json_str(r#"{ "min_wait_ms": 1000 }"#).expect("config parses");
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.limits().min_wait, Duration::from_millis(1_000));
        assert!(Arc::ptr_eq(
            &config.dispatch_table().expect("table builds"),
            &DispatchTable::standard()
        ));
    }

    #[test]
    fn custom_schedule_builds_its_own_table() {
        let config = ExecutorConfig::from_json_str(r#"{ "retry_schedule_ms": [10, 20] }"#)
            .expect("config parses");
        let table = config.dispatch_table().expect("table builds");
        match table.get(DispatchKey::Status(500)) {
            Some(Policy::Retry(schedule)) => assert_eq!(schedule.len(), 2),
            other => panic!("unexpected policy: {other:?}"),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        for text in [
            r#"{ "max_retries": 0 }"#,
            r#"{ "retry_schedule_ms": [500, 100] }"#,
            r#"{ "slow_retry_schedule_ms": [] }"#,
            r#"{ "retries": 3 }"#,
        ] {
            let error = ExecutorConfig::from_json_str(text).expect_err("config is invalid");
            assert_eq!(error.code(), ErrorCode::InvalidConfig, "{text}");
        }
    }
}
