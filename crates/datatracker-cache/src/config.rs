//! Cache configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::rate_limit::DEFAULT_ROTATE_EVERY;

/// Public Datatracker instance.
pub const DEFAULT_BASE_URL: &str = "https://datatracker.ietf.org";

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("datatracker-cache/", env!("CARGO_PKG_VERSION"));

/// Number of recorded queries after which a partial type is fetched in full.
pub const DEFAULT_PROMOTION_THRESHOLD: usize = 100;

/// Objects requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Settings for one cache instance.
///
/// ```
/// use std::time::Duration;
/// use datatracker_cache::CacheConfig;
///
/// let config = CacheConfig::new("/tmp/dt-cache")
///     .with_base_url("http://localhost:8000")
///     .with_refresh_interval(Duration::from_secs(600));
/// assert_eq!(config.base_url(), "http://localhost:8000");
/// assert_eq!(config.page_size(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    cache_dir: PathBuf,
    base_url: String,
    user_agent: String,
    refresh_interval: Duration,
    promotion_threshold: usize,
    page_size: u64,
    rotate_every: u64,
    initial_backoff: Duration,
    max_backoff: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
    remote_offset: FixedOffset,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            refresh_interval: Duration::from_secs(60 * 60),
            promotion_threshold: DEFAULT_PROMOTION_THRESHOLD,
            page_size: DEFAULT_PAGE_SIZE,
            rotate_every: DEFAULT_ROTATE_EVERY,
            initial_backoff: Duration::from_millis(1875),
            max_backoff: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            remote_offset: Utc.fix(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// How stale a timed type may get before it is incrementally refreshed.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Recorded-query count beyond which a partial type is fetched in full.
    pub fn with_promotion_threshold(mut self, threshold: usize) -> Self {
        self.promotion_threshold = threshold;
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_rotate_every(mut self, requests: u64) -> Self {
        self.rotate_every = requests.max(1);
        self
    }

    /// First retry delay after an HTTP 500 and the ceiling past which the
    /// fetch gives up. The delay doubles after each failure.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// UTC offset of the server's naive timestamps, used when building
    /// time-range queries.
    ///
    /// Datatracker has stored and served timestamps in UTC since its 2022
    /// move to timezone-aware storage, so the default is UTC. Older
    /// deployments that still emit Pacific local time need an offset here.
    /// A fixed offset does not follow daylight saving, so a window spanning
    /// a transition is off by one hour at its edges.
    pub fn with_remote_offset(mut self, offset: FixedOffset) -> Self {
        self.remote_offset = offset;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn promotion_threshold(&self) -> usize {
        self.promotion_threshold
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn rotate_every(&self) -> u64 {
        self.rotate_every
    }

    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn remote_offset(&self) -> FixedOffset {
        self.remote_offset
    }
}
