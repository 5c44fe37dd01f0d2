//! Network fetcher for Datatracker collections and items.
//!
//! Collection queries are paged with `limit`/`offset` and followed through
//! `meta.next` until exhausted. Two failure modes are handled in place:
//!
//! - HTTP 500: the connection is dropped and the same request is retried
//!   after a delay that starts at the configured initial backoff and doubles
//!   each time. Once the next delay would exceed the ceiling the fetch fails.
//! - HTTP 400 on a later page: the server sometimes cannot render a page
//!   because one object in it is inconsistent. The page is retried one object
//!   at a time, bad objects are skipped, and paging resumes after the range.
//!
//! Objects are written to the store as soon as they arrive, so a failed fetch
//! leaves everything already received in the cache.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::rate_limit::RateLimiter;
use crate::transport::{Transport, TransportResponse};
use crate::{CacheConfig, CacheError, ObjectStore, ResourceUri, SessionStats};

#[derive(Debug, Deserialize)]
struct Page {
    meta: PageMeta,
    #[serde(default)]
    objects: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct PageMeta {
    next: Option<String>,
    total_count: u64,
}

/// Outcome of a collection fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Full pages received.
    pub pages: u64,
    /// Objects written to the store.
    pub objects: u64,
    /// Offsets skipped because the server could not return them.
    pub skipped: Vec<u64>,
    /// Server-reported size of the result set.
    pub total_count: Option<u64>,
}

/// Issues rate-limited, retrying GETs against the remote API.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    base_url: String,
    limiter: RateLimiter,
    stats: Arc<SessionStats>,
    initial_backoff: Duration,
    max_backoff: Duration,
    page_size: u64,
    shutdown: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("base_url", &self.base_url)
            .field("requests", &self.limiter.requests())
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &CacheConfig,
        stats: Arc<SessionStats>,
    ) -> Self {
        Self {
            transport,
            base_url: config.base_url().to_string(),
            limiter: RateLimiter::new(config.rotate_every()),
            stats,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            page_size: config.page_size(),
            shutdown: None,
        }
    }

    /// Cancel pending backoff sleeps and stop paging once `shutdown` is true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// GETs issued so far.
    pub fn requests(&self) -> u64 {
        self.limiter.requests()
    }

    fn check_cancelled(&self) -> Result<(), CacheError> {
        match &self.shutdown {
            Some(rx) if *rx.borrow() => Err(CacheError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), CacheError> {
        let Some(rx) = &self.shutdown else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };

        let mut rx = rx.clone();
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            if *rx.borrow_and_update() {
                return Err(CacheError::Cancelled);
            }
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can cancel any more.
                        (&mut sleep).await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One GET, counted by the rate limiter.
    async fn get(&self, target: &str) -> Result<TransportResponse, CacheError> {
        if self.limiter.tick() {
            self.transport.reset_connection();
            self.stats.rotation();
            debug!(requests = self.limiter.requests(), "rotating connection");
        }
        self.stats.http_get();

        let url = if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}{}", self.base_url, target)
        };
        let response = self.transport.get(&url).await?;
        trace!(url = %url, status = response.status, "GET");
        Ok(response)
    }

    /// GET, retrying HTTP 500 with doubling backoff.
    async fn get_with_retry(&self, target: &str) -> Result<TransportResponse, CacheError> {
        // `None` once doubling overflows, which is past any ceiling.
        let mut next_delay = Some(self.initial_backoff);
        let mut waited = Duration::ZERO;
        loop {
            let response = self.get(target).await?;
            if response.status != 500 {
                return Ok(response);
            }
            let Some(delay) = next_delay.filter(|d| *d <= self.max_backoff) else {
                return Err(CacheError::BackoffExhausted {
                    uri: target.to_string(),
                    waited,
                });
            };
            warn!(
                uri = %target,
                delay_secs = delay.as_secs_f64(),
                "server error, backing off"
            );
            self.transport.reset_connection();
            self.sleep(delay).await?;
            waited = waited.saturating_add(delay);
            next_delay = delay.checked_mul(2);
        }
    }

    /// Fetch a single object. A 404 means the object does not exist.
    pub async fn fetch_item(&self, uri: &ResourceUri) -> Result<Option<Value>, CacheError> {
        self.check_cancelled()?;
        let target = uri.to_string();
        let response = self.get_with_retry(&target).await?;
        match response.status {
            200 => decode(&target, &response.body).map(Some),
            404 => {
                debug!(uri = %target, "object not found");
                Ok(None)
            }
            status => Err(fatal(&target, status)),
        }
    }

    /// Fetch every page of `query`, writing each object to `store`.
    pub async fn fetch_all(
        &self,
        query: &ResourceUri,
        store: &ObjectStore,
    ) -> Result<FetchReport, CacheError> {
        let mut report = FetchReport::default();
        let mut total: Option<u64> = None;
        let mut next = Some(query.clone().with_param("limit", self.page_size).to_string());

        while let Some(target) = next.take() {
            self.check_cancelled()?;
            let response = self.get_with_retry(&target).await?;
            match (response.status, total) {
                (200, _) => {
                    let page: Page = decode(&target, &response.body)?;
                    total = Some(page.meta.total_count);
                    report.total_count = total;
                    report.pages += 1;
                    for object in &page.objects {
                        store_object(store, &target, object)?;
                        report.objects += 1;
                    }
                    next = page.meta.next.as_deref().map(relative_target);
                }
                (400, Some(total)) => {
                    let current = ResourceUri::parse(&relative_target(&target))?;
                    let offset = current
                        .param("offset")
                        .and_then(|o| o.parse::<u64>().ok())
                        .unwrap_or(0);
                    let finish = if offset < total {
                        offset.saturating_add(self.page_size).min(total)
                    } else {
                        total
                    };
                    self.recover_range(&current, offset, finish, store, &mut report)
                        .await?;
                    if finish < total {
                        next = Some(
                            current
                                .with_param("offset", finish)
                                .with_param("limit", self.page_size)
                                .to_string(),
                        );
                    }
                }
                (status, _) => return Err(fatal(&target, status)),
            }
        }

        debug!(
            query = %query,
            pages = report.pages,
            objects = report.objects,
            skipped = report.skipped.len(),
            "fetch complete"
        );
        Ok(report)
    }

    /// Retry `[offset, finish)` one object at a time.
    async fn recover_range(
        &self,
        page: &ResourceUri,
        offset: u64,
        finish: u64,
        store: &ObjectStore,
        report: &mut FetchReport,
    ) -> Result<(), CacheError> {
        if offset >= finish {
            return Ok(());
        }
        warn!(uri = %page, offset, finish, "bad range, fetching objects one at a time");

        let mut recovered = false;
        for index in offset..finish {
            self.check_cancelled()?;
            let target = page
                .clone()
                .with_param("offset", index)
                .with_param("limit", 1)
                .to_string();
            let response = self.get_with_retry(&target).await?;
            match response.status {
                200 => {
                    let single: Page = decode(&target, &response.body)?;
                    for object in &single.objects {
                        store_object(store, &target, object)?;
                        report.objects += 1;
                    }
                    recovered = true;
                }
                400 => {
                    warn!(uri = %target, offset = index, "skipping object the server cannot return");
                    report.skipped.push(index);
                }
                status => return Err(fatal(&target, status)),
            }
        }

        if recovered {
            Ok(())
        } else {
            Err(CacheError::RecoveryExhausted {
                uri: page.to_string(),
                offset,
                finish,
            })
        }
    }
}

/// Drop scheme and host from a `meta.next` link.
fn relative_target(next: &str) -> String {
    match url::Url::parse(next) {
        Ok(url) => match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        },
        Err(_) => next.to_string(),
    }
}

fn store_object(store: &ObjectStore, source: &str, object: &Value) -> Result<(), CacheError> {
    let resource_uri = object
        .get("resource_uri")
        .and_then(Value::as_str)
        .ok_or_else(|| CacheError::InvalidResponse {
            uri: source.to_string(),
            message: "object without resource_uri".to_string(),
        })?;
    let uri = ResourceUri::parse(resource_uri)?.path_only();
    store.put(&uri, object)
}

fn decode<T: serde::de::DeserializeOwned>(uri: &str, body: &str) -> Result<T, CacheError> {
    serde_json::from_str(body).map_err(|e| CacheError::InvalidResponse {
        uri: uri.to_string(),
        message: e.to_string(),
    })
}

fn fatal(uri: &str, status: u16) -> CacheError {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("unexpected status");
    CacheError::Fatal {
        uri: uri.to_string(),
        status,
        reason: reason.to_string(),
    }
}
