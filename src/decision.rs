use std::time::Duration;

use crate::response::Response;

/// Outcome of one policy invocation, steering the request loop's next step.
///
/// Terminal and non-terminal outcomes are separate variants, so a finished
/// decision can never carry a pending wait.
#[derive(Clone, Debug)]
pub enum Decision {
    /// Stop and hand the current response to the caller. `postprocess` says
    /// whether the caller's postprocess step may run on it.
    Finish {
        postprocess: bool,
        message: Option<String>,
    },
    /// Stop and hand a substitute response (e.g. one loaded from cache) to the caller.
    Serve {
        response: Response,
        postprocess: bool,
        message: Option<String>,
    },
    /// Try again after `after`; a zero duration retries immediately.
    Retry {
        after: Duration,
        message: Option<String>,
    },
    /// Try again immediately against `location`.
    Redirect { location: String },
}

impl Decision {
    pub fn finish(postprocess: bool) -> Self {
        Self::Finish {
            postprocess,
            message: None,
        }
    }

    pub fn retry_after(after: Duration, message: impl Into<String>) -> Self {
        Self::Retry {
            after,
            message: Some(message.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Serve { .. })
    }

    /// The pending wait of a non-terminal decision.
    pub fn repeat_after(&self) -> Option<Duration> {
        match self {
            Self::Retry { after, .. } => Some(*after),
            Self::Redirect { .. } => Some(Duration::ZERO),
            Self::Finish { .. } | Self::Serve { .. } => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Finish { message, .. }
            | Self::Serve { message, .. }
            | Self::Retry { message, .. } => message.as_deref(),
            Self::Redirect { .. } => None,
        }
    }
}
