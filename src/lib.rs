//! `fetch-rate-limit` wraps a single HTTP exchange in a status-dispatched policy
//! loop: retries with a fixed backoff schedule, rate-limit waits driven by
//! `retry-after` / `x-ratelimit-reset`, redirects, and conditional-request cache
//! reuse.
//!
//! # Quick Start
//!
//! ```no_run
//! use fetch_rate_limit::prelude::{Executor, HyperTransport, Outcome, RequestOptions};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Repo {
//!     id: u64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Executor::builder(HyperTransport::new())
//!         .max_retries(4)
//!         .try_build()?;
//!
//!     match executor
//!         .fetch_json::<Repo>("http://api.example.com/repos/1", RequestOptions::new())
//!         .await?
//!     {
//!         Outcome::Processed(repo) => println!("repo id={}", repo.id),
//!         Outcome::Unprocessed(response) => println!("status={}", response.status()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Dispatch
//!
//! Every attempt's status (or transport failure kind) is looked up in a
//! [`DispatchTable`]; the matching [`Policy`] returns a [`Decision`] that
//! either finishes the call or schedules another attempt. The loop raises
//! [`Error::MaxRetriesReached`] once the attempt budget is spent.

mod cache;
mod config;
mod decision;
mod dispatch;
mod error;
mod executor;
mod extensions;
mod metrics;
mod observe;
mod policy;
mod rate_limit;
mod request;
mod response;
mod retry;
mod transport;
mod util;
mod wait;

pub use crate::cache::{MemoryCache, ResponseCache};
pub use crate::config::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_MAX_RETRIES, DEFAULT_MIN_WAIT, ExecutorConfig,
};
pub use crate::decision::Decision;
pub use crate::dispatch::{DispatchKey, DispatchTable, DispatchTableBuilder};
pub use crate::error::{BoxError, Error, ErrorCode, TransportError, TransportErrorKind};
pub use crate::executor::{Executor, ExecutorBuilder, Outcome};
pub use crate::extensions::{Clock, SystemClock};
pub use crate::metrics::ExecutorMetricsSnapshot;
pub use crate::observe::{AttemptEvent, AttemptOutcome, Reporter, TracingReporter, WaitEvent};
pub use crate::policy::{DecisionPolicy, Policy, PolicyContext, PolicyLimits};
pub use crate::rate_limit::{RATELIMIT_RESET, RETRY_AFTER, rate_limit_wait};
pub use crate::request::{AttemptRequest, RequestOptions};
pub use crate::response::Response;
pub use crate::retry::RetrySchedule;
#[cfg(feature = "hyper-transport")]
pub use crate::transport::HyperTransport;
pub use crate::transport::{Transport, TransportResult};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Decision, DispatchKey, DispatchTable, Error, ErrorCode, Executor, ExecutorConfig,
        MemoryCache, Outcome, Policy, RequestOptions, Response, Result, RetrySchedule,
        TracingReporter, Transport, TransportError, TransportErrorKind,
    };

    #[cfg(feature = "hyper-transport")]
    pub use crate::HyperTransport;
}
