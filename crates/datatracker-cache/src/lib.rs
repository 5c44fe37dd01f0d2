//! Query-answering local cache for the IETF Datatracker REST API.
//!
//! The Datatracker API is paginated and rate limited. This crate keeps a
//! persistent on-disk copy of the objects it has fetched and answers repeated
//! item and collection queries from that copy.
//!
//! ## Features
//!
//! - **Hints**: per resource type rules for evaluating filters locally
//! - **Store**: one JSON file per object plus an in-process lookaside map
//! - **Fetcher**: paging with backoff on server errors and recovery of bad ranges
//! - **Sync**: coordinator deciding when to answer locally, fetch, refresh, or
//!   promote a type to a complete copy

pub mod config;
mod error;
pub mod fetch;
pub mod filter;
pub mod hints;
pub mod metadata;
pub mod rate_limit;
mod resource;
mod stats;
mod store;
pub mod sync;
pub mod transport;
mod uri;

pub use config::CacheConfig;
pub use error::CacheError;
pub use fetch::{FetchReport, Fetcher};
pub use filter::{Dereferencer, Filter, FilterOp, Predicate};
pub use hints::{CacheHints, HintsRegistry};
pub use metadata::{CacheMetadata, MetadataStore};
pub use rate_limit::RateLimiter;
pub use resource::Resource;
pub use stats::{SessionStats, SessionSummary, StatsSnapshot};
pub use store::ObjectStore;
pub use sync::{SyncCoordinator, SyncCoordinatorBuilder};
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use uri::{ResourceUri, UriError};
