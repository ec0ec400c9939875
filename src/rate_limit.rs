use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::HeaderMap;

use crate::decision::Decision;
use crate::policy::PolicyContext;
use crate::util::format_wait_seconds;

pub const RETRY_AFTER: &str = "retry-after";
pub const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Wait announced by the first rate-limit header carrying a usable value.
///
/// `retry-after` (delta seconds or HTTP-date) is consulted before
/// `x-ratelimit-reset` (absolute epoch seconds). A reset value that does not
/// parse falls back to `min_wait`. Returns `None` when no header asks for a
/// positive wait; positive waits below `min_wait` are raised to it.
pub fn rate_limit_wait(headers: &HeaderMap, now: SystemTime, min_wait: Duration) -> Option<Duration> {
    let wait = retry_after_wait(headers, now).or_else(|| ratelimit_reset_wait(headers, now, min_wait))?;
    if wait.is_zero() {
        return None;
    }
    Some(wait.max(min_wait))
}

fn header_text<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn retry_after_wait(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let raw_value = header_text(headers, RETRY_AFTER)?;
    if let Ok(seconds) = raw_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = httpdate::parse_http_date(raw_value).ok()?;
    match date.duration_since(now) {
        Ok(duration) => Some(duration),
        Err(_) => Some(Duration::ZERO),
    }
}

fn ratelimit_reset_wait(headers: &HeaderMap, now: SystemTime, min_wait: Duration) -> Option<Duration> {
    let raw_value = header_text(headers, RATELIMIT_RESET)?;
    let Some(reset_secs) = raw_value.parse::<f64>().ok().filter(|value| value.is_finite()) else {
        return Some(min_wait);
    };

    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |elapsed| elapsed.as_secs_f64() * 1000.0);
    let wait_ms = reset_secs * 1000.0 - now_ms;
    if wait_ms <= 0.0 {
        return Some(Duration::ZERO);
    }
    Some(Duration::from_millis(wait_ms.ceil() as u64))
}

pub(crate) fn rate_limit_decision(context: &PolicyContext<'_>) -> Decision {
    let Some(response) = context.response else {
        return Decision::finish(false);
    };

    match rate_limit_wait(response.headers(), context.now, context.limits.min_wait) {
        Some(wait) => Decision::retry_after(
            wait,
            format!("Rate limit reached: waiting for {}", format_wait_seconds(wait)),
        ),
        None => Decision::finish(response.is_success()),
    }
}
