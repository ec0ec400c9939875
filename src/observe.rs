use std::time::Duration;

use http::{Method, StatusCode};
use tracing::{info, warn};

use crate::error::TransportError;
use crate::util::redact_url_for_logs;

#[derive(Clone, Copy, Debug)]
pub enum AttemptOutcome<'a> {
    Status(StatusCode),
    NoResponse,
    Error(&'a TransportError),
}

impl std::fmt::Display for AttemptOutcome<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(status) => write!(formatter, "{}", status.as_u16()),
            Self::NoResponse => formatter.write_str("no response"),
            Self::Error(error) => formatter.write_str(error.code()),
        }
    }
}

/// One finished attempt: url, method, status-or-error and the attempt number.
#[derive(Clone, Copy, Debug)]
pub struct AttemptEvent<'a> {
    pub url: &'a str,
    pub method: &'a Method,
    pub outcome: AttemptOutcome<'a>,
    pub attempt: usize,
}

/// A wait about to start, with the deciding policy's message.
#[derive(Clone, Copy, Debug)]
pub struct WaitEvent<'a> {
    pub url: &'a str,
    pub method: &'a Method,
    pub attempt: usize,
    pub delay: Duration,
    pub message: &'a str,
}

/// Progress sink. Fire-and-forget: nothing a reporter does changes the
/// outcome of a request.
pub trait Reporter: Send + Sync {
    fn on_attempt(&self, _event: &AttemptEvent<'_>) {}

    fn on_wait(&self, _event: &WaitEvent<'_>) {}
}

/// Forwards progress events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn on_attempt(&self, event: &AttemptEvent<'_>) {
        info!(
            url = %redact_url_for_logs(event.url),
            method = %event.method,
            outcome = %event.outcome,
            attempt = event.attempt,
            "attempt finished"
        );
    }

    fn on_wait(&self, event: &WaitEvent<'_>) {
        warn!(
            url = %redact_url_for_logs(event.url),
            method = %event.method,
            attempt = event.attempt,
            delay_ms = event.delay.as_millis() as u64,
            "{}",
            event.message
        );
    }
}
