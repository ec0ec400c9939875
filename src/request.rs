use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::dispatch::DispatchTable;
use crate::observe::Reporter;

/// Per-call options for [`Executor::fetch`](crate::Executor::fetch).
///
/// Unset overrides fall back to the executor's configuration.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<Bytes>,
    pub(crate) max_retries: Option<usize>,
    pub(crate) dispatch_table: Option<Arc<DispatchTable>>,
    pub(crate) cache: Option<Arc<dyn ResponseCache>>,
    pub(crate) reporter: Option<Arc<dyn Reporter>>,
    pub(crate) cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for RequestOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(Bytes::len))
            .field("max_retries", &self.max_retries)
            .field("dispatch_table", &self.dispatch_table.is_some())
            .field("cache", &self.cache.is_some())
            .field("reporter", &self.reporter.is_some())
            .field("cancellation", &self.cancellation.is_some())
            .finish()
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries.max(1));
        self
    }

    /// Replaces the executor's dispatch table for this call only.
    pub fn dispatch_table(mut self, dispatch_table: Arc<DispatchTable>) -> Self {
        self.dispatch_table = Some(dispatch_table);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn configured_method(&self) -> &Method {
        &self.method
    }

    pub fn configured_headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// The request handed to the transport for a single attempt.
///
/// Built fresh per attempt; cache header patches are already merged in.
#[derive(Clone, Debug)]
pub struct AttemptRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub attempt: usize,
}
