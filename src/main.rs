//! Scopecache driver.
//!
//! Reads one JSON request per line from stdin, `{"verb": "...", "args": {...}}`,
//! runs it against a single shared cache and prints one JSON reply per line.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use scopecache::verbs::ReturnEvaluator;
use scopecache::{CacheStore, Config, StaticScope, VerbContext, VerbRegistry};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// One line of input.
#[derive(Debug, Deserialize)]
struct Request {
    verb: String,
    #[serde(default)]
    args: Value,
}

async fn handle_line(
    registry: Arc<VerbRegistry>,
    ctx: VerbContext,
    line: &str,
) -> anyhow::Result<Value> {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Ok(json!({ "error": format!("invalid request: {}", e) })),
    };

    debug!("Invoking [{}]", request.verb);
    let verb = request.verb.clone();
    let result = if registry.is_async(&verb) {
        registry.invoke_async(&verb, &ctx, &request.args).await
    } else {
        // Blocking verbs may wait on a key lock, keep them off the reactor threads.
        tokio::task::spawn_blocking(move || registry.invoke(&request.verb, &ctx, &request.args))
            .await?
    };

    Ok(match result {
        Ok(value) => json!({ "ok": value }),
        Err(e) => {
            warn!("[{}] failed: {:#}", verb, e);
            json!({ "error": format!("{:#}", e) })
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("scopecache=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    info!("Configuration loaded, scope: {:?}", config.scope);

    let scope = StaticScope::new(config.scope.clone());
    let store = CacheStore::with_config(scope, config.store_config());
    let ctx = VerbContext::new(store, &config)
        .with_evaluator(ReturnEvaluator)
        .with_async_evaluator(ReturnEvaluator);
    let registry = Arc::new(VerbRegistry::with_defaults());
    info!("Verbs available: {}", registry.names().join(", "));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reply = handle_line(Arc::clone(&registry), ctx.clone(), line).await?;

        stdout.write_all(reply.to_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("Input closed, shutting down");
    Ok(())
}
