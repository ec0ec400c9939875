use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use crate::error::{TransportError, TransportErrorKind};
use crate::policy::Policy;
use crate::response::Response;
use crate::retry::RetrySchedule;

/// Lookup key of the dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DispatchKey {
    /// An HTTP status code.
    Status(u16),
    /// A transport failure class.
    Transport(TransportErrorKind),
    /// Any transient transport failure whose kind has no entry of its own.
    AnyTransient,
    /// The transport completed without producing a response.
    NoResponse,
}

static STANDARD_TABLE: LazyLock<Arc<DispatchTable>> =
    LazyLock::new(|| Arc::new(DispatchTable::with_schedules(RetrySchedule::standard(), RetrySchedule::slow())));

static DEFAULT_POLICY: Policy = Policy::Default;

/// Immutable status/error → policy mapping.
///
/// Unmapped statuses fall back to [`Policy::Default`]; unmapped transport
/// failures have no policy and propagate.
#[derive(Clone, Debug, Default)]
pub struct DispatchTable {
    entries: BTreeMap<DispatchKey, Policy>,
}

impl DispatchTable {
    /// The process-wide table built from the standard and slow retry schedules.
    pub fn standard() -> Arc<Self> {
        Arc::clone(&STANDARD_TABLE)
    }

    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// The standard mapping with caller-chosen retry schedules.
    ///
    /// | keys | policy |
    /// |---|---|
    /// | 301 302 303 307 308 | redirect |
    /// | 304 | cache |
    /// | 400 412 413 | error |
    /// | 403 429 | rate limit |
    /// | 408 409 500 502 503 504, reset, read, connect, any transient | retry |
    /// | dns, timeout | retry (slow schedule) |
    pub fn with_schedules(schedule: RetrySchedule, slow_schedule: RetrySchedule) -> Self {
        let retry = Policy::Retry(schedule);
        let slow_retry = Policy::Retry(slow_schedule);
        Self::builder()
            .on_statuses([301, 302, 303, 307, 308], Policy::Redirect)
            .on_status(304, Policy::Cache)
            .on_statuses([400, 412, 413], Policy::Error)
            .on_statuses([403, 429], Policy::RateLimit)
            .on_statuses([408, 409, 500, 502, 503, 504], retry.clone())
            .on_transport(TransportErrorKind::Reset, retry.clone())
            .on_transport(TransportErrorKind::Read, retry.clone())
            .on_transport(TransportErrorKind::Connect, retry.clone())
            .on_transport(TransportErrorKind::Dns, slow_retry.clone())
            .on_transport(TransportErrorKind::Timeout, slow_retry)
            .on(DispatchKey::AnyTransient, retry)
            .build()
    }

    pub fn get(&self, key: DispatchKey) -> Option<&Policy> {
        self.entries.get(&key)
    }

    /// Policy for a response: exact status match, else the default policy.
    pub fn policy_for_response(&self, response: &Response) -> &Policy {
        let key = if response.is_synthetic() {
            DispatchKey::NoResponse
        } else {
            DispatchKey::Status(response.status().as_u16())
        };
        self.get(key).unwrap_or(&DEFAULT_POLICY)
    }

    /// Policy for a transport failure: exact kind match, then the transient
    /// sentinel for transient failures, else none.
    pub fn policy_for_error(&self, error: &TransportError) -> Option<&Policy> {
        self.get(DispatchKey::Transport(error.kind())).or_else(|| {
            if error.is_transient() {
                self.get(DispatchKey::AnyTransient)
            } else {
                None
            }
        })
    }

    /// Copies this table into a builder for amendment.
    pub fn to_builder(&self) -> DispatchTableBuilder {
        DispatchTableBuilder {
            entries: self.entries.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = DispatchKey> + '_ {
        self.entries.keys().copied()
    }
}

#[derive(Clone, Debug, Default)]
pub struct DispatchTableBuilder {
    entries: BTreeMap<DispatchKey, Policy>,
}

impl DispatchTableBuilder {
    pub fn on(mut self, key: DispatchKey, policy: Policy) -> Self {
        self.entries.insert(key, policy);
        self
    }

    pub fn on_status(self, status: u16, policy: Policy) -> Self {
        self.on(DispatchKey::Status(status), policy)
    }

    pub fn on_statuses(mut self, statuses: impl IntoIterator<Item = u16>, policy: Policy) -> Self {
        for status in statuses {
            self.entries.insert(DispatchKey::Status(status), policy.clone());
        }
        self
    }

    pub fn on_transport(self, kind: TransportErrorKind, policy: Policy) -> Self {
        self.on(DispatchKey::Transport(kind), policy)
    }

    pub fn remove(mut self, key: DispatchKey) -> Self {
        self.entries.remove(&key);
        self
    }

    pub fn build(self) -> DispatchTable {
        DispatchTable {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    use super::{DispatchKey, DispatchTable};
    use crate::error::{TransportError, TransportErrorKind};
    use crate::policy::Policy;
    use crate::response::Response;

    fn response(status: u16) -> Response {
        Response::new(
            "http://somewhere/",
            StatusCode::from_u16(status).expect("valid status"),
            HeaderMap::new(),
            Bytes::new(),
        )
    }

    #[test]
    fn standard_table_maps_status_classes() {
        let table = DispatchTable::standard();
        let expectations = [
            (301, "redirect"),
            (308, "redirect"),
            (304, "cache"),
            (400, "error"),
            (413, "error"),
            (403, "rate_limit"),
            (429, "rate_limit"),
            (500, "retry"),
            (503, "retry"),
            (408, "retry"),
            (200, "default"),
            (404, "default"),
            (401, "default"),
        ];
        for (status, expected) in expectations {
            assert_eq!(
                table.policy_for_response(&response(status)).name(),
                expected,
                "status {status}"
            );
        }
    }

    #[test]
    fn standard_table_is_shared() {
        let first = DispatchTable::standard();
        let second = DispatchTable::standard();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_response_falls_back_to_default_policy() {
        let table = DispatchTable::standard();
        let policy = table.policy_for_response(&Response::missing("http://somewhere/"));
        assert_eq!(policy.name(), "default");

        let routed = table
            .to_builder()
            .on(DispatchKey::NoResponse, Policy::Error)
            .build();
        assert_eq!(
            routed
                .policy_for_response(&Response::missing("http://somewhere/"))
                .name(),
            "error"
        );
    }

    #[test]
    fn unmapped_transport_error_has_no_policy() {
        let table = DispatchTable::standard();
        let tls = TransportError::new(TransportErrorKind::Tls, "handshake failed");
        assert!(table.policy_for_error(&tls).is_none());

        let timeout = TransportError::new(TransportErrorKind::Timeout, "timed out");
        assert_eq!(
            table.policy_for_error(&timeout).map(Policy::name),
            Some("retry")
        );
    }

    #[test]
    fn transient_sentinel_covers_unlisted_transient_errors() {
        let table = DispatchTable::standard();
        let flagged = TransportError::new(TransportErrorKind::Other, "EPIPE").transient(true);
        assert_eq!(
            table.policy_for_error(&flagged).map(Policy::name),
            Some("retry")
        );

        let without_sentinel = table.to_builder().remove(DispatchKey::AnyTransient).build();
        assert!(without_sentinel.policy_for_error(&flagged).is_none());
    }
}
