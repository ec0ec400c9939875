use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::Result;
use crate::cache::ResponseCache;
use crate::config::ExecutorConfig;
use crate::decision::Decision;
use crate::dispatch::DispatchTable;
use crate::error::{Error, TransportError};
use crate::extensions::{Clock, SystemClock};
use crate::metrics::{ExecutorMetrics, ExecutorMetricsSnapshot};
use crate::observe::{AttemptEvent, AttemptOutcome, Reporter, WaitEvent};
use crate::policy::{Policy, PolicyContext, PolicyLimits};
use crate::request::{AttemptRequest, RequestOptions};
use crate::response::Response;
use crate::transport::Transport;
use crate::util::{
    is_conditional_method, merge_headers, redact_url_for_logs, resolve_redirect_location,
};
use crate::wait::wait;

/// Result of a call that reached a terminal decision.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    /// The response was accepted and the postprocess step ran on it.
    Processed(T),
    /// The response was surfaced as-is, e.g. a 400 or an unserved 304.
    Unprocessed(Response),
}

impl<T> Outcome<T> {
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed(_))
    }

    pub fn processed(self) -> Option<T> {
        match self {
            Self::Processed(value) => Some(value),
            Self::Unprocessed(_) => None,
        }
    }

    pub fn unprocessed(self) -> Option<Response> {
        match self {
            Self::Processed(_) => None,
            Self::Unprocessed(response) => Some(response),
        }
    }
}

pub struct ExecutorBuilder {
    transport: Arc<dyn Transport>,
    config: ExecutorConfig,
    dispatch_table: Option<Arc<DispatchTable>>,
    cache: Option<Arc<dyn ResponseCache>>,
    reporter: Option<Arc<dyn Reporter>>,
    clock: Arc<dyn Clock>,
}

impl ExecutorBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            config: ExecutorConfig::default(),
            dispatch_table: None,
            cache: None,
            reporter: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces all serializable settings at once.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn min_wait(mut self, min_wait: Duration) -> Self {
        self.config.min_wait_ms = min_wait.as_millis() as u64;
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    /// Overrides the table derived from the configured schedules.
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

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn try_build(self) -> Result<Executor> {
        self.config.validate()?;
        let dispatch_table = match self.dispatch_table {
            Some(dispatch_table) => dispatch_table,
            None => self.config.dispatch_table()?,
        };
        Ok(Executor {
            transport: self.transport,
            dispatch_table,
            limits: self.config.limits(),
            max_retries: self.config.max_retries,
            cache: self.cache,
            reporter: self.reporter,
            clock: self.clock,
            metrics: ExecutorMetrics::default(),
        })
    }

    #[track_caller]
    pub fn build(self) -> Executor {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build executor: {error}; use try_build() to handle configuration errors")
        })
    }
}

/// Runs requests through the status-dispatched policy loop.
///
/// Cloning is cheap; clones share the transport, collaborators and metrics.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    dispatch_table: Arc<DispatchTable>,
    limits: PolicyLimits,
    max_retries: usize,
    cache: Option<Arc<dyn ResponseCache>>,
    reporter: Option<Arc<dyn Reporter>>,
    clock: Arc<dyn Clock>,
    metrics: ExecutorMetrics,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Executor")
            .field("dispatch_table_entries", &self.dispatch_table.len())
            .field("limits", &self.limits)
            .field("max_retries", &self.max_retries)
            .field("cache", &self.cache.is_some())
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

/// Per-call view of the executor settings with request overrides applied.
struct Call<'a> {
    method: &'a Method,
    headers: &'a HeaderMap,
    body: Option<&'a Bytes>,
    max_retries: usize,
    dispatch_table: &'a DispatchTable,
    cache: Option<&'a dyn ResponseCache>,
    reporter: Option<&'a dyn Reporter>,
    cancellation: Option<&'a CancellationToken>,
}

impl Call<'_> {
    fn cancelled(&self, url: &str) -> Error {
        Error::Cancelled {
            method: self.method.clone(),
            url: url.to_owned(),
        }
    }
}

struct Accepted {
    response: Response,
    postprocess: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RepeatKind {
    Retry,
    RateLimit,
    Redirect,
}

enum Step {
    Accept(Accepted),
    Repeat {
        after: Duration,
        message: Option<String>,
        location: Option<String>,
        kind: RepeatKind,
    },
}

impl Executor {
    pub fn builder(transport: impl Transport + 'static) -> ExecutorBuilder {
        ExecutorBuilder::new(Arc::new(transport))
    }

    pub fn dispatch_table(&self) -> &Arc<DispatchTable> {
        &self.dispatch_table
    }

    pub fn limits(&self) -> PolicyLimits {
        self.limits
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn metrics_snapshot(&self) -> ExecutorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs the loop and returns the accepted response without postprocessing.
    ///
    /// Policy-classified failures such as a 400 come back as `Ok`; inspect
    /// [`Response::is_success`].
    pub async fn fetch(&self, url: impl Into<String>, options: RequestOptions) -> Result<Response> {
        let accepted = self.execute(url.into(), &options).await?;
        Ok(accepted.response)
    }

    /// Runs the loop and applies `postprocess` when the terminal decision
    /// allows it. Postprocess errors are returned unchanged and never retried.
    pub async fn fetch_with<T, E, F, Fut>(
        &self,
        url: impl Into<String>,
        options: RequestOptions,
        postprocess: F,
    ) -> std::result::Result<Outcome<T>, E>
    where
        F: FnOnce(Response) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let accepted = self.execute(url.into(), &options).await?;
        if accepted.postprocess {
            Ok(Outcome::Processed(postprocess(accepted.response).await?))
        } else {
            Ok(Outcome::Unprocessed(accepted.response))
        }
    }

    /// [`Executor::fetch_with`] with a JSON body decoder as the postprocess step.
    pub async fn fetch_json<T>(
        &self,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<Outcome<T>>
    where
        T: DeserializeOwned,
    {
        self.fetch_with(url, options, |response| async move { response.json::<T>() })
            .await
    }

    fn call<'a>(&'a self, options: &'a RequestOptions) -> Call<'a> {
        Call {
            method: &options.method,
            headers: &options.headers,
            body: options.body.as_ref(),
            max_retries: options.max_retries.unwrap_or(self.max_retries).max(1),
            dispatch_table: options
                .dispatch_table
                .as_deref()
                .unwrap_or(&*self.dispatch_table),
            cache: options
                .cache
                .as_ref()
                .or(self.cache.as_ref())
                .map(|cache| &**cache),
            reporter: options
                .reporter
                .as_ref()
                .or(self.reporter.as_ref())
                .map(|reporter| &**reporter),
            cancellation: options.cancellation.as_ref(),
        }
    }

    async fn execute(&self, url: String, options: &RequestOptions) -> Result<Accepted> {
        self.metrics.record_request_started();
        let call = self.call(options);
        let result = self.run(&call, url).await;
        match &result {
            Ok(_) => self.metrics.record_request_succeeded(),
            Err(error) => self.metrics.record_request_failed(error),
        }
        result
    }

    async fn run(&self, call: &Call<'_>, mut url: String) -> Result<Accepted> {
        for attempt in 1..=call.max_retries {
            let span = info_span!(
                "fetch.attempt",
                method = %call.method,
                url = %redact_url_for_logs(&url),
                attempt = attempt,
                max_retries = call.max_retries
            );
            let step = self
                .run_attempt(call, &url, attempt)
                .instrument(span.clone())
                .await?;
            let (after, message, location, kind) = match step {
                Step::Accept(accepted) => return Ok(accepted),
                Step::Repeat {
                    after,
                    message,
                    location,
                    kind,
                } => (after, message, location, kind),
            };
            if attempt == call.max_retries {
                break;
            }

            match kind {
                RepeatKind::Retry => self.metrics.record_retry(),
                RepeatKind::RateLimit => self.metrics.record_rate_limit_wait(),
                RepeatKind::Redirect => self.metrics.record_redirect(),
            }
            if !after.is_zero() {
                span.in_scope(|| {
                    warn!(
                        delay_ms = after.as_millis() as u64,
                        reason = message.as_deref().unwrap_or(""),
                        "waiting before next attempt"
                    );
                });
            }
            let report = match (call.reporter, message.as_deref()) {
                (Some(reporter), Some(message)) => Some((
                    reporter,
                    WaitEvent {
                        url: &url,
                        method: call.method,
                        attempt,
                        delay: after,
                        message,
                    },
                )),
                _ => None,
            };
            if wait(after, report, call.cancellation)
                .instrument(span.clone())
                .await
                .is_err()
            {
                return Err(call.cancelled(&url));
            }

            if let Some(location) = location {
                let next = resolve_redirect_location(&url, &location).ok_or_else(|| {
                    Error::InvalidRedirectLocation {
                        location: location.clone(),
                        method: call.method.clone(),
                        url: url.clone(),
                    }
                })?;
                span.in_scope(|| {
                    warn!(location = %redact_url_for_logs(&next), "following redirect");
                });
                url = next;
            }
        }

        warn!(
            method = %call.method,
            url = %redact_url_for_logs(&url),
            max_retries = call.max_retries,
            "max retry count reached"
        );
        Err(Error::MaxRetriesReached {
            url,
            method: call.method.clone(),
            max_retries: call.max_retries,
        })
    }

    async fn run_attempt(&self, call: &Call<'_>, url: &str, attempt: usize) -> Result<Step> {
        debug!("sending request");
        self.metrics.record_attempt();

        let mut headers = call.headers.clone();
        if let Some(cache) = call.cache
            && is_conditional_method(call.method)
        {
            let patch = cache.conditional_headers(url).await;
            headers = merge_headers(&headers, &patch);
        }
        let request = AttemptRequest {
            url: url.to_owned(),
            method: call.method.clone(),
            headers,
            body: call.body.cloned(),
            attempt,
        };

        let result = match call.cancellation {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(call.cancelled(url)),
                result = self.transport.perform(request) => result,
            },
            None => self.transport.perform(request).await,
        };

        match result {
            Ok(response) => {
                let response = response.unwrap_or_else(|| Response::missing(url));
                self.decide_response(call, url, attempt, response).await
            }
            Err(error) => self.decide_transport_error(call, url, attempt, error).await,
        }
    }

    async fn decide_response(
        &self,
        call: &Call<'_>,
        url: &str,
        attempt: usize,
        response: Response,
    ) -> Result<Step> {
        let outcome = if response.is_synthetic() {
            AttemptOutcome::NoResponse
        } else {
            self.metrics.record_status(response.status().as_u16());
            AttemptOutcome::Status(response.status())
        };
        if let Some(reporter) = call.reporter {
            reporter.on_attempt(&AttemptEvent {
                url,
                method: call.method,
                outcome,
                attempt,
            });
        }

        let policy = call.dispatch_table.policy_for_response(&response);
        let context = PolicyContext {
            response: Some(&response),
            error: None,
            url,
            method: call.method,
            attempt,
            limits: &self.limits,
            now: self.clock.now_system(),
            cache: call.cache,
        };
        let decision = policy.decide(&context).await?;
        debug!(
            outcome = %outcome,
            policy = policy.name(),
            terminal = decision.is_terminal(),
            reason = decision.message().unwrap_or(""),
            "policy decided"
        );

        Ok(match decision {
            Decision::Finish { postprocess, .. } => Step::Accept(Accepted {
                response,
                postprocess,
            }),
            Decision::Serve {
                response: served,
                postprocess,
                ..
            } => {
                self.metrics.record_cache_hit();
                Step::Accept(Accepted {
                    response: served,
                    postprocess,
                })
            }
            Decision::Retry { after, message } => Step::Repeat {
                after,
                message,
                location: None,
                kind: if matches!(policy, Policy::RateLimit) {
                    RepeatKind::RateLimit
                } else {
                    RepeatKind::Retry
                },
            },
            Decision::Redirect { location } => Step::Repeat {
                after: Duration::ZERO,
                message: None,
                location: Some(location),
                kind: RepeatKind::Redirect,
            },
        })
    }

    /// Only a positive wait keeps a transport failure alive; every other
    /// decision rethrows it.
    async fn decide_transport_error(
        &self,
        call: &Call<'_>,
        url: &str,
        attempt: usize,
        error: TransportError,
    ) -> Result<Step> {
        self.metrics.record_transport_error(&error);
        if let Some(reporter) = call.reporter {
            reporter.on_attempt(&AttemptEvent {
                url,
                method: call.method,
                outcome: AttemptOutcome::Error(&error),
                attempt,
            });
        }

        let Some(policy) = call.dispatch_table.policy_for_error(&error) else {
            debug!(kind = error.code(), "no policy for transport error");
            return Err(Error::Transport(error));
        };
        let context = PolicyContext {
            response: None,
            error: Some(&error),
            url,
            method: call.method,
            attempt,
            limits: &self.limits,
            now: self.clock.now_system(),
            cache: call.cache,
        };
        let decision = policy.decide(&context).await?;
        debug!(
            kind = error.code(),
            policy = policy.name(),
            reason = decision.message().unwrap_or(""),
            "policy decided"
        );

        match decision {
            Decision::Retry { after, message } if !after.is_zero() => Ok(Step::Repeat {
                after,
                message,
                location: None,
                kind: if matches!(policy, Policy::RateLimit) {
                    RepeatKind::RateLimit
                } else {
                    RepeatKind::Retry
                },
            }),
            _ => Err(Error::Transport(error)),
        }
    }
}
