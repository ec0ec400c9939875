use std::sync::Mutex;
use std::time::Duration;

use http::{HeaderMap, Method};

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Applies `patch` on top of `headers`; patched names replace existing values.
pub(crate) fn merge_headers(headers: &HeaderMap, patch: &HeaderMap) -> HeaderMap {
    let mut merged = headers.clone();
    for (name, value) in patch {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

pub(crate) fn is_conditional_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

pub(crate) fn redact_url_for_logs(url_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url_text) else {
        return url_text.split('?').next().unwrap_or(url_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Resolves a `location` header value against the url that produced it.
pub(crate) fn resolve_redirect_location(current_url: &str, location: &str) -> Option<String> {
    match url::Url::parse(current_url) {
        Ok(base) => base.join(location).ok().map(String::from),
        Err(_) => url::Url::parse(location).ok().map(String::from),
    }
}

/// Renders a wait the way progress messages report it: `5s`, `1.5s`.
pub(crate) fn format_wait_seconds(delay: Duration) -> String {
    format!("{}s", delay.as_millis() as f64 / 1000.0)
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
