//! End-to-end query answering against a mock Datatracker.

use std::sync::Arc;

use chrono::{Duration, Utc};
use datatracker_cache::{
    CacheConfig, CacheError, CacheMetadata, MetadataStore, ObjectStore, Resource, ResourceUri,
    SessionStats, SyncCoordinator,
};
use pretty_assertions::assert_eq;
use serde::Deserialize;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn page(objects: Vec<Value>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "meta": {
            "limit": 100,
            "next": null,
            "offset": 0,
            "previous": null,
            "total_count": objects.len(),
        },
        "objects": objects,
    }))
}

fn document(id: u64, group: u64, time: &str) -> Value {
    json!({
        "id": id,
        "resource_uri": format!("/api/v1/doc/document/draft-test-{id}/"),
        "name": format!("draft-test-{id}"),
        "group": format!("/api/v1/group/group/{group}/"),
        "time": time,
    })
}

fn person(id: u64) -> Value {
    json!({
        "id": id,
        "resource_uri": format!("/api/v1/person/person/{id}/"),
        "name": format!("Person {id}"),
        "time": "2020-01-01T00:00:00",
    })
}

fn uri(s: &str) -> ResourceUri {
    ResourceUri::parse(s).unwrap()
}

fn coordinator(server: &MockServer, dir: &TempDir) -> SyncCoordinator {
    coordinator_with(server, dir, |config| config)
}

fn coordinator_with(
    server: &MockServer,
    dir: &TempDir,
    configure: impl FnOnce(CacheConfig) -> CacheConfig,
) -> SyncCoordinator {
    let config = configure(CacheConfig::new(dir.path()).with_base_url(server.uri()));
    SyncCoordinator::new(config).unwrap()
}

fn ids(objects: &[Value]) -> Vec<u64> {
    objects.iter().map(|o| o["id"].as_u64().unwrap()).collect()
}

#[tokio::test]
async fn test_query_replay_is_answered_locally() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/doc/document/"))
        .and(query_param("group", "2161"))
        .and(query_param("limit", "100"))
        .respond_with(page(vec![
            document(2, 2161, "2020-02-01T00:00:00"),
            document(1, 2161, "2020-01-01T00:00:00"),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);
    let query = uri("/api/v1/doc/document/?group=2161");

    let first = cache.query_json(&query).await.unwrap();
    let second = cache.query_json(&query).await.unwrap();
    assert_eq!(ids(&first), vec![1, 2]);
    assert_eq!(first, second);

    let meta = cache.metadata(&query).unwrap().unwrap();
    assert!(meta.partial);
    assert_eq!(meta.queries, vec!["/api/v1/doc/document/?group=2161".to_string()]);

    // Only the replay is a cache hit.
    let stats = cache.stats();
    assert_eq!(stats.cache_requests, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.http_gets, 1);

    // A fresh session over the same directory needs no network either.
    let reopened = coordinator(&server, &dir);
    assert_eq!(reopened.query_json(&query).await.unwrap(), first);
    assert_eq!(reopened.stats().cache_hits, 1);
    assert_eq!(reopened.stats().http_gets, 0);
}

#[tokio::test]
async fn test_item_is_fetched_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/person/person/20209/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(person(20209)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);
    let item = uri("/api/v1/person/person/20209/");

    let first = cache.get_json(&item).await.unwrap();
    let second = cache.get_json(&item).await.unwrap();
    assert_eq!(first, Some(person(20209)));
    assert_eq!(first, second);

    let stats = cache.stats();
    assert_eq!(stats.cache_requests, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.http_gets, 1);

    let summary = cache.summary();
    assert_eq!(summary.cache_hit_rate, 0.5);
    assert_eq!(summary.lookaside_len, 1);

    // Item fetches count towards promotion.
    let meta = cache.metadata(&item.parent()).unwrap().unwrap();
    assert_eq!(meta.queries, vec!["/api/v1/person/person/20209/".to_string()]);
}

#[tokio::test]
async fn test_missing_item_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/person/person/1/"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);
    assert_eq!(cache.get_json(&uri("/api/v1/person/person/1/")).await.unwrap(), None);
}

#[tokio::test]
async fn test_user_agent_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/person/person/7/"))
        .and(header("user-agent", "test-agent/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(person(7)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator_with(&server, &dir, |c| c.with_user_agent("test-agent/1.0"));
    assert!(cache.get_json(&uri("/api/v1/person/person/7/")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_promotion_after_threshold() {
    let server = MockServer::start().await;
    for id in [1, 2] {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/person/person/{id}/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(person(id)))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/api/v1/person/person/"))
        .and(query_param("limit", "100"))
        .respond_with(page(vec![person(1), person(2), person(3)]))
        .expect(1)
        .mount(&server)
        .await;
    for id in [3, 4] {
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/person/person/{id}/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(person(id)))
            .expect(0)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let cache = coordinator_with(&server, &dir, |c| c.with_promotion_threshold(1));

    cache.get_json(&uri("/api/v1/person/person/1/")).await.unwrap();
    cache.get_json(&uri("/api/v1/person/person/2/")).await.unwrap();

    // Two recorded queries exceed the threshold: the next call fetches the
    // whole type and then answers from disk.
    let third = cache.get_json(&uri("/api/v1/person/person/3/")).await.unwrap();
    assert_eq!(third, Some(person(3)));

    // Absent from a complete type means it does not exist.
    let fourth = cache.get_json(&uri("/api/v1/person/person/4/")).await.unwrap();
    assert_eq!(fourth, None);

    let meta = cache.metadata(&uri("/api/v1/person/person/")).unwrap().unwrap();
    assert!(!meta.partial);
    assert!(meta.queries.is_empty());

    let all = cache.query_json(&uri("/api/v1/person/person/")).await.unwrap();
    assert_eq!(ids(&all), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_outdated_timed_type_is_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/doc/document/"))
        .and(|req: &Request| {
            let param = |name: &str| {
                req.url
                    .query_pairs()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.into_owned())
            };
            match (param("time__gte"), param("time__lt")) {
                (Some(gte), Some(lt)) => gte.len() == 26 && lt.len() == 26 && gte < lt,
                _ => false,
            }
        })
        .respond_with(page(vec![document(2, 2161, "2020-02-01T00:00:00")]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let type_uri = uri("/api/v1/doc/document/");
    let stale = Utc::now() - Duration::hours(2);
    MetadataStore::new(dir.path())
        .save(
            &type_uri,
            &CacheMetadata {
                created: stale,
                updated: stale,
                partial: true,
                queries: vec!["/api/v1/doc/document/?group=2161".to_string()],
            },
        )
        .unwrap();
    ObjectStore::new(dir.path(), Arc::new(SessionStats::new()))
        .put(
            &uri("/api/v1/doc/document/draft-test-1/"),
            &document(1, 2161, "2020-01-01T00:00:00"),
        )
        .unwrap();

    let cache = coordinator(&server, &dir);
    let result = cache
        .query_json(&uri("/api/v1/doc/document/?group=2161"))
        .await
        .unwrap();
    assert_eq!(ids(&result), vec![1, 2]);

    let meta = cache.metadata(&type_uri).unwrap().unwrap();
    assert!(meta.updated > Utc::now() - Duration::minutes(1));
    assert_eq!(meta.created, stale);
}

#[tokio::test]
async fn test_time_range_is_applied_locally() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/doc/document/"))
        .and(query_param_is_missing("time__gte"))
        .respond_with(page(vec![
            document(1, 1, "2019-06-01T00:00:00"),
            document(2, 1, "2021-06-01T00:00:00"),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);

    let recent = cache
        .query_json(&uri("/api/v1/doc/document/?time__gte=2020-01-01T00%3A00%3A00"))
        .await
        .unwrap();
    assert_eq!(ids(&recent), vec![2]);

    let everything = cache
        .query_json(&uri("/api/v1/doc/document/?time__gte=2018-01-01T00%3A00%3A00"))
        .await
        .unwrap();
    assert_eq!(ids(&everything), vec![1, 2]);
}

#[tokio::test]
async fn test_deref_filter() {
    let server = MockServer::start().await;
    let related = |id: u64, relationship: &str| {
        json!({
            "id": id,
            "resource_uri": format!("/api/v1/doc/relateddocument/{id}/"),
            "source": "/api/v1/doc/document/draft-a/",
            "target": format!("/api/v1/doc/document/rfc{id}/"),
            "relationship": format!("/api/v1/name/docrelationshipname/{relationship}/"),
        })
    };
    for (id, slug) in [(1, "refinfo"), (2, "refnorm")] {
        Mock::given(method("GET"))
            .and(path("/api/v1/doc/relateddocument/"))
            .and(query_param("relationship", slug))
            .respond_with(page(vec![related(id, slug)]))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/api/v1/name/docrelationshipname/{slug}/")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "slug": slug,
                "resource_uri": format!("/api/v1/name/docrelationshipname/{slug}/"),
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);

    let informative = cache
        .query_json(&uri("/api/v1/doc/relateddocument/?relationship=refinfo"))
        .await
        .unwrap();
    assert_eq!(ids(&informative), vec![1]);

    // Both relationships are now cached; only the normative one matches.
    let normative = cache
        .query_json(&uri("/api/v1/doc/relateddocument/?relationship=refnorm"))
        .await
        .unwrap();
    assert_eq!(ids(&normative), vec![2]);
}

#[tokio::test]
async fn test_reverse_sort() {
    let server = MockServer::start().await;
    let event = |id: u64| {
        json!({
            "id": id,
            "resource_uri": format!("/api/v1/group/groupevent/{id}/"),
            "group": "/api/v1/group/group/2161/",
            "time": "2020-01-01T00:00:00",
        })
    };
    Mock::given(method("GET"))
        .and(path("/api/v1/group/groupevent/"))
        .respond_with(page(vec![event(5), event(20), event(7)]))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);
    let events = cache
        .query_json(&uri("/api/v1/group/groupevent/?group=2161"))
        .await
        .unwrap();
    assert_eq!(ids(&events), vec![20, 7, 5]);
}

#[tokio::test]
async fn test_unknown_resource_type() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);

    let err = cache
        .query_json(&uri("/api/v1/nonexistent/thing/"))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::UnknownResourceType { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[derive(Debug, PartialEq, Deserialize)]
struct Person {
    id: u64,
    name: String,
}

impl Resource for Person {
    const TYPE_PATH: &'static str = "/api/v1/person/person/";
}

#[tokio::test]
async fn test_typed_access() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/person/person/3/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(person(3)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let cache = coordinator(&server, &dir);

    let found: Option<Person> = cache.get(&uri("/api/v1/person/person/3/")).await.unwrap();
    assert_eq!(
        found,
        Some(Person {
            id: 3,
            name: "Person 3".to_string(),
        })
    );

    let err = cache
        .get::<Person>(&uri("/api/v1/doc/document/draft-test-1/"))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::WrongResourceType { .. }));
}
