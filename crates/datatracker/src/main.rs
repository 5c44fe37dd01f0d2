//! datatracker: query the IETF Datatracker through a local cache
//!
//! Subcommands:
//! - `get`: fetch one object
//! - `query`: list the objects of a resource type matching filters
//! - `refresh`: bring a resource type up to date, or fetch it in full
//! - `info`: show the cache state of a resource type
//! - `hints`: list the configured resource types

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Default log filter when neither --log-level nor RUST_LOG is set.
const DEFAULT_LOG_FILTER: &str = "datatracker=info,datatracker_cache=info";

#[derive(Parser, Debug)]
#[command(name = "datatracker")]
#[command(about = "Query the IETF Datatracker through a local cache", long_about = None)]
struct Cli {
    /// Cache directory (defaults to the user cache directory)
    #[arg(long, global = true, env = "DATATRACKER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Datatracker base URL
    #[arg(long, global = true, env = "DATATRACKER_URL")]
    url: Option<String>,

    /// User-Agent header sent with every request
    #[arg(long, global = true, env = "DATATRACKER_USER_AGENT")]
    user_agent: Option<String>,

    /// JSON file with cache hints replacing the built-in table
    #[arg(long, global = true, env = "DATATRACKER_HINTS")]
    hints: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "datatracker_cache=trace"
    #[arg(long, global = true, env = "DATATRACKER_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch one object by URI, e.g. /api/v1/person/person/20209/
    Get {
        /// Object URI
        uri: String,
    },

    /// List objects of a resource type matching filters
    Query {
        /// Resource type path, e.g. /api/v1/doc/document/
        resource_type: String,

        /// Filters as name=value, e.g. group=2161 name__contains=quic
        filters: Vec<String>,
    },

    /// Bring a resource type up to date
    Refresh {
        /// Resource type path
        resource_type: String,

        /// Fetch every object and mark the type complete
        #[arg(long)]
        full: bool,
    },

    /// Show cache metadata for a resource type
    Info {
        /// Resource type path
        resource_type: String,
    },

    /// List resource types with cache hints
    Hints,
}

fn log_filter(cli_level: Option<&str>) -> String {
    cli_level
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_filter(
            cli.log_level.as_deref(),
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    commands::run(cli).await
}
