//! HTTP transport used by the fetcher.
//!
//! The fetcher only needs a status code and a body, so the transport is a
//! narrow trait. [`HttpTransport`] is the reqwest implementation; tests swap
//! in scripted transports.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::CacheError;

/// Status and body of one GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends GET requests for absolute URLs.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<TransportResponse, CacheError>;

    /// Drop the current connection so the next request opens a new one.
    fn reset_connection(&self);
}

/// reqwest-backed transport.
///
/// Resetting replaces the client, which drops its connection pool.
#[derive(Debug)]
pub struct HttpTransport {
    client: RwLock<Client>,
    user_agent: String,
    connect_timeout: Duration,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        user_agent: impl Into<String>,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let user_agent = user_agent.into();
        let client = build_client(&user_agent, connect_timeout, timeout)?;
        Ok(Self {
            client: RwLock::new(client),
            user_agent,
            connect_timeout,
            timeout,
        })
    }

    fn client(&self) -> Client {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn build_client(
    user_agent: &str,
    connect_timeout: Duration,
    timeout: Duration,
) -> Result<Client, CacheError> {
    Ok(Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()?)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, CacheError> {
        let response = self.client().get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }

    fn reset_connection(&self) {
        match build_client(&self.user_agent, self.connect_timeout, self.timeout) {
            Ok(client) => {
                *self.client.write().unwrap_or_else(PoisonError::into_inner) = client;
                debug!("rotated HTTP connection");
            }
            // Keep the old client; the next request reuses its pool.
            Err(e) => debug!(error = %e, "failed to rebuild HTTP client"),
        }
    }
}
