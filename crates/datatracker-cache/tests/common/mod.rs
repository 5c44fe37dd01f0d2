//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use datatracker_cache::{CacheError, ResourceUri, Transport, TransportResponse};
use serde_json::{Value, json};
use url::Url;

/// Base URL used with scripted transports.
pub const BASE_URL: &str = "http://datatracker.test";

/// A request seen by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
}

impl Request {
    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn param_u64(&self, name: &str) -> Option<u64> {
        self.param(name).and_then(|v| v.parse().ok())
    }
}

type Handler = dyn Fn(&Request) -> TransportResponse + Send + Sync;

/// In-memory transport answering requests with a closure.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<Request>>,
    resets: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(handler: impl Fn(&Request) -> TransportResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            resets: AtomicUsize::new(0),
        })
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, CacheError> {
        let request = Request {
            url: Url::parse(url).unwrap(),
        };
        self.requests.lock().unwrap().push(request.clone());
        Ok((self.handler)(&request))
    }

    fn reset_connection(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// A minimal Datatracker object with a numeric id.
pub fn object(type_path: &str, id: u64) -> Value {
    json!({
        "id": id,
        "resource_uri": format!("{type_path}{id}/"),
        "name": format!("object-{id}"),
    })
}

/// A collection page in the Datatracker response shape.
pub fn page(objects: Vec<Value>, total: u64, next: Option<String>) -> TransportResponse {
    let body = json!({
        "meta": {
            "limit": objects.len(),
            "next": next,
            "offset": 0,
            "previous": null,
            "total_count": total,
        },
        "objects": objects,
    });
    TransportResponse::new(200, body.to_string())
}

/// Serve objects with ids `1..=total` honouring `limit` and `offset`, with a
/// `next` link that keeps the request's other parameters.
pub fn serve_collection(request: &Request, type_path: &str, total: u64) -> TransportResponse {
    let limit = request.param_u64("limit").unwrap_or(20);
    let offset = request.param_u64("offset").unwrap_or(0);
    let end = (offset + limit).min(total);
    let objects = (offset..end).map(|i| object(type_path, i + 1)).collect();

    let next = (end < total).then(|| {
        let query = request.url.query().unwrap_or("");
        ResourceUri::parse(&format!("{}?{}", request.path(), query))
            .unwrap()
            .with_param("offset", end)
            .to_string()
    });
    page(objects, total, next)
}

/// A 200 response carrying `value`.
pub fn json_response(value: Value) -> TransportResponse {
    TransportResponse::new(200, value.to_string())
}

pub fn status(code: u16) -> TransportResponse {
    TransportResponse::new(code, "")
}
