use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt};
use http::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue};

use crate::error::BoxError;
use crate::response::Response;
use crate::util::lock_unpoisoned;

/// Response cache consulted around GET/HEAD attempts.
///
/// Implementations are shared across concurrent requests and must make their
/// own reads and writes safe.
pub trait ResponseCache: Send + Sync {
    /// Conditional-request headers to merge into the next attempt against `url`.
    fn conditional_headers<'a>(&'a self, url: &'a str) -> BoxFuture<'a, HeaderMap>;

    /// Remembers `response` for later conditional requests.
    fn store_response<'a>(&'a self, response: &'a Response) -> BoxFuture<'a, Result<(), BoxError>>;

    /// Materializes the stored counterpart of a "not modified" response.
    fn load_response<'a>(
        &'a self,
        response: &'a Response,
    ) -> BoxFuture<'a, Result<Option<Response>, BoxError>>;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
    response: Response,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    // Urls from oldest to newest store.
    order: VecDeque<String>,
}

impl CacheState {
    fn touch(&mut self, url: &str) {
        if let Some(position) = self.order.iter().position(|stored| stored == url) {
            self.order.remove(position);
        }
        self.order.push_back(url.to_owned());
    }

    fn evict_oldest(&mut self) {
        if let Some(oldest) = self.order.pop_front() {
            self.entries.remove(&oldest);
        }
    }
}

/// In-process validator cache keyed by url.
///
/// Only successful responses carrying `etag` or `last-modified` are kept. At
/// capacity the least recently stored url is evicted.
#[derive(Debug)]
pub struct MemoryCache {
    state: Mutex<CacheState>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.entries.clear();
        state.order.clear();
    }

    fn headers_for(&self, url: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let state = lock_unpoisoned(&self.state);
        let Some(entry) = state.entries.get(url) else {
            return headers;
        };
        if let Some(etag) = &entry.etag {
            headers.insert(IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = &entry.last_modified {
            headers.insert(IF_MODIFIED_SINCE, last_modified.clone());
        }
        headers
    }

    fn store(&self, response: &Response) {
        if !response.is_success() {
            return;
        }
        let etag = response.headers().get(ETAG).cloned();
        let last_modified = response.headers().get(LAST_MODIFIED).cloned();
        if etag.is_none() && last_modified.is_none() {
            return;
        }

        let mut state = lock_unpoisoned(&self.state);
        if !state.entries.contains_key(response.url()) {
            while state.entries.len() >= self.max_entries && !state.order.is_empty() {
                state.evict_oldest();
            }
        }
        state.touch(response.url());
        state.entries.insert(
            response.url().to_owned(),
            CacheEntry {
                etag,
                last_modified,
                response: response.clone(),
            },
        );
    }

    fn load(&self, response: &Response) -> Option<Response> {
        let state = lock_unpoisoned(&self.state);
        let entry = state.entries.get(response.url())?;
        if let (Some(stored), Some(received)) = (&entry.etag, response.headers().get(ETAG))
            && stored != received
        {
            return None;
        }
        Some(entry.response.clone().with_url(response.url()))
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ResponseCache for MemoryCache {
    fn conditional_headers<'a>(&'a self, url: &'a str) -> BoxFuture<'a, HeaderMap> {
        futures_util::future::ready(self.headers_for(url)).boxed()
    }

    fn store_response<'a>(&'a self, response: &'a Response) -> BoxFuture<'a, Result<(), BoxError>> {
        self.store(response);
        futures_util::future::ready(Ok(())).boxed()
    }

    fn load_response<'a>(
        &'a self,
        response: &'a Response,
    ) -> BoxFuture<'a, Result<Option<Response>, BoxError>> {
        futures_util::future::ready(Ok(self.load(response))).boxed()
    }
}
