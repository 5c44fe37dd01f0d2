//! Sync coordinator: answers item and collection queries from the cache.
//!
//! Every public operation first brings the owning resource type up to date:
//!
//! 1. A partial type with more recorded queries than the promotion threshold
//!    is fetched in full and marked complete.
//! 2. Otherwise a timed type last updated longer ago than the refresh interval
//!    is refreshed by fetching objects modified since the last update.
//!
//! Collection queries are then answered locally when the query (ignoring its
//! time range) was answered before or the type is complete. Otherwise the
//! query is fetched, recorded, and answered locally in the same way, so a
//! first call and its replays always return the same objects.
//!
//! All operations that touch the network or metadata are serialized behind one
//! async mutex. Reads of already cached objects through [`SyncCoordinator::cached`]
//! do not take the lock.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::fetch::{FetchReport, Fetcher};
use crate::filter::{Dereferencer, Filter, RESERVED_PARAMS};
use crate::hints::{CacheHints, HintsRegistry};
use crate::metadata::CacheMetadata;
use crate::stats::{SessionSummary, StatsSnapshot};
use crate::transport::{HttpTransport, Transport};
use crate::{CacheConfig, CacheError, ObjectStore, Resource, ResourceUri, SessionStats};

/// Query-answering cache over the Datatracker API.
pub struct SyncCoordinator {
    config: CacheConfig,
    hints: Arc<HintsRegistry>,
    store: ObjectStore,
    fetcher: Fetcher,
    stats: Arc<SessionStats>,
    lock: Mutex<()>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("cache_dir", &self.config.cache_dir())
            .field("base_url", &self.config.base_url())
            .field("resource_types", &self.hints.len())
            .finish_non_exhaustive()
    }
}

impl SyncCoordinator {
    /// Create a coordinator with the built-in hints and an HTTP transport.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        SyncCoordinatorBuilder::new(config).build()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn hints(&self) -> &HintsRegistry {
        &self.hints
    }

    /// Fetch one object, or `None` if it does not exist.
    pub async fn get_json(&self, uri: &ResourceUri) -> Result<Option<Value>, CacheError> {
        let item = uri.path_only();
        let type_uri = item.parent();
        let _guard = self.lock.lock().await;
        let hints = self.hints.get(&type_uri)?;
        self.ensure_fresh_locked(&type_uri, hints).await?;
        self.retrieve(&item).await
    }

    /// Fetch one object and decode it as `T`.
    pub async fn get<T: Resource>(&self, uri: &ResourceUri) -> Result<Option<T>, CacheError> {
        T::check(uri)?;
        match self.get_json(uri).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// All objects matching a collection query, in the type's stable order.
    pub async fn query_json(&self, query: &ResourceUri) -> Result<Vec<Value>, CacheError> {
        let type_uri = query.path_only();
        let _guard = self.lock.lock().await;
        let hints = self.hints.get(&type_uri)?;
        let meta = self.ensure_fresh_locked(&type_uri, hints).await?;

        let key = hints.query_key(&query.without_params(RESERVED_PARAMS));
        let key_str = key.to_string();
        let answerable = !meta.partial || meta.has_query(&key_str);
        self.stats.cache_request(answerable);
        if !answerable {
            let report = self.fetcher.fetch_all(&key, &self.store).await?;
            self.store
                .metadata()
                .record_query(&type_uri, &key_str, Utc::now())?;
            debug!(
                query = %key_str,
                objects = report.objects,
                skipped = report.skipped.len(),
                "recorded query"
            );
        } else {
            debug!(query = %key_str, partial = meta.partial, "answering from cache");
        }

        self.answer(query, &type_uri, hints).await
    }

    /// All objects matching a collection query, decoded as `T`.
    pub async fn query<T: Resource>(&self, query: &ResourceUri) -> Result<Vec<T>, CacheError> {
        T::check(query)?;
        self.query_json(query)
            .await?
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(CacheError::from))
            .collect()
    }

    /// Bring a resource type up to date and return its metadata.
    pub async fn ensure_fresh(&self, type_uri: &ResourceUri) -> Result<CacheMetadata, CacheError> {
        let type_uri = type_uri.path_only();
        let _guard = self.lock.lock().await;
        let hints = self.hints.get(&type_uri)?;
        self.ensure_fresh_locked(&type_uri, hints).await
    }

    /// Fetch every object of a resource type and mark it complete.
    pub async fn promote(&self, type_uri: &ResourceUri) -> Result<CacheMetadata, CacheError> {
        let type_uri = type_uri.path_only();
        let _guard = self.lock.lock().await;
        self.hints.get(&type_uri)?;
        let mut meta = self
            .store
            .metadata()
            .ensure_initialized(&type_uri, Utc::now())?;
        self.promote_locked(&type_uri, &mut meta).await?;
        Ok(meta)
    }

    /// Stored metadata for a resource type, if it has been cached.
    pub fn metadata(&self, type_uri: &ResourceUri) -> Result<Option<CacheMetadata>, CacheError> {
        self.store.metadata().load(&type_uri.path_only())
    }

    /// A cached object, without touching the network.
    pub fn cached(&self, uri: &ResourceUri) -> Result<Option<Value>, CacheError> {
        self.store.get(&uri.path_only())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn log_summary(&self) {
        self.stats.log_summary(self.store.lookaside_len());
    }

    /// Session counters, hit rates and lookaside size.
    pub fn summary(&self) -> SessionSummary {
        self.stats.summary(self.store.lookaside_len())
    }

    async fn ensure_fresh_locked(
        &self,
        type_uri: &ResourceUri,
        hints: &CacheHints,
    ) -> Result<CacheMetadata, CacheError> {
        let now = Utc::now();
        let mut meta = self.store.metadata().ensure_initialized(type_uri, now)?;

        if meta.partial && meta.queries.len() > self.config.promotion_threshold() {
            info!(
                resource_type = %type_uri,
                queries = meta.queries.len(),
                "promoting partial cache to full"
            );
            self.promote_locked(type_uri, &mut meta).await?;
            return Ok(meta);
        }

        let age = (now - meta.updated).to_std().unwrap_or(Duration::ZERO);
        if age <= self.config.refresh_interval() {
            return Ok(meta);
        }
        if !hints.timed {
            debug!(
                resource_type = %type_uri,
                updated = %meta.updated,
                "cache is outdated but the type has no modification time"
            );
            return Ok(meta);
        }

        info!(
            resource_type = %type_uri,
            updated = %meta.updated,
            "refreshing outdated cache"
        );
        let changed = type_uri
            .clone()
            .with_param(hints.time_gte_param(), self.remote_time(meta.updated))
            .with_param(hints.time_lt_param(), self.remote_time(now));
        let report = self.fetcher.fetch_all(&changed, &self.store).await?;
        log_report(type_uri, &report);

        meta.updated = now;
        self.store.metadata().save(type_uri, &meta)?;
        Ok(meta)
    }

    async fn promote_locked(
        &self,
        type_uri: &ResourceUri,
        meta: &mut CacheMetadata,
    ) -> Result<(), CacheError> {
        let started = Utc::now();
        let report = self.fetcher.fetch_all(type_uri, &self.store).await?;
        log_report(type_uri, &report);
        meta.promote(started);
        self.store.metadata().save(type_uri, meta)?;
        info!(resource_type = %type_uri, objects = report.objects, "cache is complete");
        Ok(())
    }

    /// Serve an item from the cache, fetching it on a miss.
    async fn retrieve(&self, item: &ResourceUri) -> Result<Option<Value>, CacheError> {
        let hit = self.store.has(item)?;
        self.stats.cache_request(hit);
        if hit {
            return self.store.get(item);
        }

        let Some(object) = self.fetcher.fetch_item(item).await? else {
            return Ok(None);
        };
        self.store.put(item, &object)?;
        self.store
            .metadata()
            .record_query(&item.parent(), &item.to_string(), Utc::now())?;
        Ok(Some(object))
    }

    async fn answer(
        &self,
        query: &ResourceUri,
        type_uri: &ResourceUri,
        hints: &CacheHints,
    ) -> Result<Vec<Value>, CacheError> {
        let filter = Filter::parse(query, hints);
        let resolver = ItemResolver { coordinator: self };

        let mut matched = Vec::new();
        for (uri, object) in self.store.scan(type_uri)? {
            if filter.matches(&object, &resolver).await? {
                matched.push((uri, object));
            }
        }
        sort_objects(&mut matched, hints);
        Ok(matched.into_iter().map(|(_, object)| object).collect())
    }

    /// Format a time the way the server expects in range filters.
    fn remote_time(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.config.remote_offset())
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string()
    }
}

fn log_report(type_uri: &ResourceUri, report: &FetchReport) {
    if !report.skipped.is_empty() {
        info!(
            resource_type = %type_uri,
            skipped = ?report.skipped,
            "some objects could not be retrieved"
        );
    }
    debug!(
        resource_type = %type_uri,
        pages = report.pages,
        objects = report.objects,
        "fetched"
    );
}

/// Resolves references during local matching. Runs under the coordinator
/// lock held by the calling query.
struct ItemResolver<'a> {
    coordinator: &'a SyncCoordinator,
}

#[async_trait]
impl Dereferencer for ItemResolver<'_> {
    async fn deref(&self, uri: &str) -> Result<Option<Value>, CacheError> {
        let Ok(item) = ResourceUri::parse(uri) else {
            debug!(uri, "ignoring malformed reference");
            return Ok(None);
        };
        self.coordinator.retrieve(&item.path_only()).await
    }
}

/// Order objects by the type's sort fields, then by id.
fn sort_objects(objects: &mut [(ResourceUri, Value)], hints: &CacheHints) {
    objects.sort_by(|(a_uri, a), (b_uri, b)| {
        let ordering = hints
            .sort_by
            .iter()
            .map(|field| json_cmp(a.get(field), b.get(field)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| id_cmp(a_uri.id(), b_uri.id()));
        if hints.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

/// Total order over JSON scalars: missing and null first, then booleans,
/// numbers, strings, and anything else.
fn json_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.total_cmp(&y)
            }
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

fn id_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

/// Builder for a [`SyncCoordinator`].
pub struct SyncCoordinatorBuilder {
    config: CacheConfig,
    hints: Option<HintsRegistry>,
    transport: Option<Arc<dyn Transport>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl SyncCoordinatorBuilder {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            hints: None,
            transport: None,
            shutdown: None,
        }
    }

    /// Use a custom hints registry instead of the built-in Datatracker table.
    pub fn hints(mut self, hints: HintsRegistry) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Use a custom transport instead of HTTP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Abort pending fetches once `shutdown` turns true.
    pub fn shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> Result<SyncCoordinator, CacheError> {
        std::fs::create_dir_all(self.config.cache_dir())?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                self.config.user_agent(),
                self.config.connect_timeout(),
                self.config.request_timeout(),
            )?),
        };
        let stats = Arc::new(SessionStats::new());
        let mut fetcher = Fetcher::new(transport, &self.config, stats.clone());
        if let Some(shutdown) = self.shutdown {
            fetcher = fetcher.with_shutdown(shutdown);
        }

        Ok(SyncCoordinator {
            store: ObjectStore::new(self.config.cache_dir(), stats.clone()),
            hints: Arc::new(self.hints.unwrap_or_else(HintsRegistry::datatracker)),
            config: self.config,
            fetcher,
            stats,
            lock: Mutex::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn uri(s: &str) -> ResourceUri {
        ResourceUri::new(s).unwrap()
    }

    #[test]
    fn test_builder() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::new(dir.path()).with_base_url("http://localhost:1");
        let coordinator = SyncCoordinatorBuilder::new(config).build().unwrap();
        assert_eq!(coordinator.config().base_url(), "http://localhost:1");
        assert!(coordinator.hints().contains("/api/v1/doc/document/"));
    }

    #[test]
    fn test_remote_time_uses_configured_offset() {
        use chrono::{FixedOffset, TimeZone};

        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let pacific = FixedOffset::west_opt(8 * 3600).unwrap();
        let config = CacheConfig::new(dir.path()).with_remote_offset(pacific);
        let local = SyncCoordinator::new(config).unwrap();
        assert_eq!(local.remote_time(at), "2024-03-01T04:30:00.000000");
    }

    #[test]
    fn test_sort_numeric_ids() {
        let hints = CacheHints::new(&[], &[], &[], false, false);
        let mut objects = vec![
            (uri("/t/10/"), json!({})),
            (uri("/t/9/"), json!({})),
            (uri("/t/100/"), json!({})),
        ];
        sort_objects(&mut objects, &hints);
        let ids: Vec<&str> = objects.iter().map(|(u, _)| u.id()).collect();
        assert_eq!(ids, vec!["9", "10", "100"]);
    }

    #[test]
    fn test_sort_by_fields_reversed() {
        let hints = CacheHints::new(&[], &[], &["order", "id"], true, false);
        let mut objects = vec![
            (uri("/t/1/"), json!({"order": 2, "id": 1})),
            (uri("/t/2/"), json!({"order": 1, "id": 2})),
            (uri("/t/3/"), json!({"order": 2, "id": 3})),
        ];
        sort_objects(&mut objects, &hints);
        let ids: Vec<&str> = objects.iter().map(|(u, _)| u.id()).collect();
        assert_eq!(ids, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_json_cmp_ranks_types() {
        assert_eq!(json_cmp(None, Some(&json!(1))), Ordering::Less);
        assert_eq!(json_cmp(Some(&json!("a")), Some(&json!(1))), Ordering::Greater);
        assert_eq!(json_cmp(Some(&json!(1.5)), Some(&json!(2))), Ordering::Less);
    }

    #[test]
    fn test_remote_time_format() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = SyncCoordinator::new(CacheConfig::new(dir.path())).unwrap();
        let time = DateTime::parse_from_rfc3339("2020-03-04T05:06:07.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(coordinator.remote_time(time), "2020-03-04T05:06:07.500000");
    }
}
