use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::Method;
use http::header::LOCATION;
use tracing::warn;

use crate::Result;
use crate::cache::ResponseCache;
use crate::config::{DEFAULT_MAX_REDIRECTS, DEFAULT_MIN_WAIT};
use crate::decision::Decision;
use crate::error::{Error, TransportError};
use crate::rate_limit::rate_limit_decision;
use crate::response::Response;
use crate::retry::RetrySchedule;
use crate::util::{format_wait_seconds, is_conditional_method};

/// Bounds shared by all policies of one executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyLimits {
    /// Floor applied to every positive rate-limit wait.
    pub min_wait: Duration,
    /// Redirects are followed while the attempt number does not exceed this.
    pub max_redirects: usize,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// Everything a policy may look at. `response` is absent when the transport raised.
pub struct PolicyContext<'a> {
    pub response: Option<&'a Response>,
    pub error: Option<&'a TransportError>,
    pub url: &'a str,
    pub method: &'a Method,
    pub attempt: usize,
    pub limits: &'a PolicyLimits,
    pub now: SystemTime,
    pub cache: Option<&'a dyn ResponseCache>,
}

/// Caller-provided decision logic for [`Policy::Custom`].
pub trait DecisionPolicy: Send + Sync {
    fn decide(&self, context: &PolicyContext<'_>) -> Decision;
}

/// One decision function per class of outcome.
#[derive(Clone)]
pub enum Policy {
    /// Back off along the schedule; give up once it is exhausted.
    Retry(RetrySchedule),
    /// Follow `location` immediately, within the redirect bound.
    Redirect,
    /// Wait as long as the rate-limit headers ask.
    RateLimit,
    /// Surface the response unprocessed.
    Error,
    /// Accept the response; store it in the cache when one is configured.
    Default,
    /// Serve the stored response for a "not modified" answer.
    Cache,
    Custom(Arc<dyn DecisionPolicy>),
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry(schedule) => formatter.debug_tuple("Retry").field(schedule).finish(),
            Self::Redirect => formatter.write_str("Redirect"),
            Self::RateLimit => formatter.write_str("RateLimit"),
            Self::Error => formatter.write_str("Error"),
            Self::Default => formatter.write_str("Default"),
            Self::Cache => formatter.write_str("Cache"),
            Self::Custom(_) => formatter.write_str("Custom(..)"),
        }
    }
}

impl Policy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Retry(_) => "retry",
            Self::Redirect => "redirect",
            Self::RateLimit => "rate_limit",
            Self::Error => "error",
            Self::Default => "default",
            Self::Cache => "cache",
            Self::Custom(_) => "custom",
        }
    }

    pub async fn decide(&self, context: &PolicyContext<'_>) -> Result<Decision> {
        let decision = match self {
            Self::Retry(schedule) => retry_decision(schedule, context),
            Self::Redirect => redirect_decision(context),
            Self::RateLimit => rate_limit_decision(context),
            Self::Error => Decision::finish(false),
            Self::Default => default_decision(context).await,
            Self::Cache => return cache_decision(context).await,
            Self::Custom(policy) => policy.decide(context),
        };
        Ok(decision)
    }
}

fn retry_decision(schedule: &RetrySchedule, context: &PolicyContext<'_>) -> Decision {
    match schedule.delay_for_attempt(context.attempt) {
        Some(delay) => Decision::retry_after(
            delay,
            format!(
                "Retry {} after {}",
                context.attempt,
                format_wait_seconds(delay)
            ),
        ),
        None => Decision::finish(false),
    }
}

fn redirect_decision(context: &PolicyContext<'_>) -> Decision {
    if context.attempt > context.limits.max_redirects {
        return Decision::finish(false);
    }
    let location = context
        .response
        .and_then(|response| response.headers().get(LOCATION))
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    match location {
        Some(location) => Decision::Redirect {
            location: location.to_owned(),
        },
        None => Decision::Finish {
            postprocess: false,
            message: Some("redirect without location".to_owned()),
        },
    }
}

async fn default_decision(context: &PolicyContext<'_>) -> Decision {
    let Some(response) = context.response else {
        return Decision::finish(false);
    };
    if let Some(cache) = context.cache
        && is_conditional_method(context.method)
        && let Err(error) = cache.store_response(response).await
    {
        warn!(error = %error, "failed to store response in cache");
    }
    Decision::finish(response.is_success())
}

async fn cache_decision(context: &PolicyContext<'_>) -> Result<Decision> {
    let (Some(response), Some(cache)) = (context.response, context.cache) else {
        return Ok(Decision::Finish {
            postprocess: false,
            message: Some("not modified, no cache configured".to_owned()),
        });
    };
    let loaded = cache
        .load_response(response)
        .await
        .map_err(Error::cache)?;
    Ok(match loaded {
        Some(cached) => Decision::Serve {
            postprocess: cached.is_success(),
            response: cached,
            message: Some("served from cache".to_owned()),
        },
        None => Decision::Finish {
            postprocess: false,
            message: Some("not modified, no cached entry".to_owned()),
        },
    })
}
