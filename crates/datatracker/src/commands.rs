//! Subcommand implementations.

use std::path::PathBuf;

use datatracker_cache::{
    CacheConfig, HintsRegistry, ResourceUri, SyncCoordinator, SyncCoordinatorBuilder,
};
use miette::Result;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::{Cli, Commands};

/// Execute the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let cache = open_cache(&cli, shutdown_rx)?;
    let output = execute(&cache, cli.command).await;
    cache.log_summary();

    print_json(&output?)
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("datatracker")
}

fn open_cache(cli: &Cli, shutdown: watch::Receiver<bool>) -> Result<SyncCoordinator> {
    let cache_dir = cli.cache_dir.clone().unwrap_or_else(default_cache_dir);
    let mut config = CacheConfig::new(&cache_dir);
    if let Some(url) = &cli.url {
        config = config.with_base_url(url.as_str());
    }
    if let Some(user_agent) = &cli.user_agent {
        config = config.with_user_agent(user_agent.as_str());
    }

    let mut builder = SyncCoordinatorBuilder::new(config).shutdown(shutdown);
    if let Some(path) = &cli.hints {
        let hints = HintsRegistry::from_json_file(path)
            .map_err(|e| miette::miette!("failed to load hints from {}: {}", path.display(), e))?;
        builder = builder.hints(hints);
    }

    debug!(cache_dir = %cache_dir.display(), "opening cache");
    builder
        .build()
        .map_err(|e| miette::miette!("failed to open cache: {}", e))
}

async fn execute(cache: &SyncCoordinator, command: Commands) -> Result<Value> {
    match command {
        Commands::Get { uri } => {
            let uri = parse_uri(&uri)?;
            let object = cache
                .get_json(&uri)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            Ok(object.unwrap_or(Value::Null))
        }

        Commands::Query {
            resource_type,
            filters,
        } => {
            let query = build_query(&resource_type, &filters)?;
            let objects = cache
                .query_json(&query)
                .await
                .map_err(|e| miette::miette!("{}", e))?;
            info!(query = %query, count = objects.len(), "query answered");
            Ok(Value::Array(objects))
        }

        Commands::Refresh {
            resource_type,
            full,
        } => {
            let type_uri = parse_uri(&resource_type)?;
            let meta = if full {
                cache.promote(&type_uri).await
            } else {
                cache.ensure_fresh(&type_uri).await
            }
            .map_err(|e| miette::miette!("{}", e))?;
            serde_json::to_value(meta).map_err(|e| miette::miette!("{}", e))
        }

        Commands::Info { resource_type } => {
            let type_uri = parse_uri(&resource_type)?;
            let hints = cache
                .hints()
                .get(&type_uri)
                .map_err(|e| miette::miette!("{}", e))?;
            let meta = cache
                .metadata(&type_uri)
                .map_err(|e| miette::miette!("{}", e))?;
            Ok(json!({
                "resource_type": type_uri.path(),
                "hints": hints,
                "metadata": meta,
            }))
        }

        Commands::Hints => Ok(json!(cache.hints().type_paths())),
    }
}

fn parse_uri(uri: &str) -> Result<ResourceUri> {
    ResourceUri::parse(uri).map_err(|e| miette::miette!("{}", e))
}

/// Build a query URI from a type path and `name=value` filters.
fn build_query(resource_type: &str, filters: &[String]) -> Result<ResourceUri> {
    let mut query = parse_uri(resource_type)?;
    for filter in filters {
        let (name, value) = filter
            .split_once('=')
            .ok_or_else(|| miette::miette!("filter must be name=value: {}", filter))?;
        if name.is_empty() {
            return Err(miette::miette!("filter name is empty: {}", filter));
        }
        query.set_param(name, value);
    }
    Ok(query)
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| miette::miette!("{}", e))?;
    println!("{text}");
    Ok(())
}
