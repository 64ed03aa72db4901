//! Graphrest CLI
//!
//! Exercise a REST backend through the graphrest loaders:
//! - `get`: fetch one canonical path
//! - `paged`: build a connection over a backend that paginates itself
//! - `unpaged`: build a connection over a backend returning whole collections
//! - `bulk`: resolve many keys through chunked bulk requests
//!
//! Results are printed as pretty JSON on stdout; logs go to stderr.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use graphrest_core::{
    build_path, BulkConfig, Resource, ResourceConfig, Transport, DEFAULT_CHUNK_SIZE,
};
use graphrest_http::{HttpConfig, HttpTransport};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphrest")]
#[command(author, version, about = "Graphrest: batched graph reads over REST")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Backend base URL (defaults to `GRAPHREST_BASE_URL`)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Request timeout in milliseconds (defaults to `GRAPHREST_TIMEOUT_MS`)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Suppress all logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Resource path, optionally with a query string
    path: String,
    /// Query argument `key=value`; values parse as JSON when possible
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    args: Vec<String>,
}

#[derive(Args)]
struct PageArgs {
    #[arg(long)]
    first: Option<i64>,
    #[arg(long)]
    after: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one entity
    Get {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Connection over a paginating backend (`limit`/`cursor`)
    Paged {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Connection over a backend returning the whole collection
    Unpaged {
        #[command(flatten)]
        query: QueryArgs,
        #[command(flatten)]
        page: PageArgs,
    },

    /// Resolve keys through chunked bulk requests
    Bulk {
        /// Collection path, e.g. `/users`
        path: String,
        /// Keys to resolve
        #[arg(required = true)]
        keys: Vec<String>,
        /// Query parameter carrying the keys
        #[arg(long, default_value = "id")]
        param: String,
        /// Item field the keys join on
        #[arg(long, default_value = "id")]
        key_field: String,
        /// Keys per bulk request
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Send each distinct key once per chunk
        #[arg(long)]
        dedupe: bool,
    },
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Parse `key=value`; the value is JSON if it parses, otherwise a string.
fn parse_arg(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got `{raw}`"))?;
    if key.is_empty() {
        bail!("empty argument name in `{raw}`");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn collect_args(raw: &[String], page: Option<&PageArgs>) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    for item in raw {
        let (key, value) = parse_arg(item)?;
        args.insert(key, value);
    }
    if let Some(page) = page {
        if let Some(first) = page.first {
            args.insert("first".to_string(), Value::from(first));
        }
        if let Some(after) = &page.after {
            args.insert("after".to_string(), Value::String(after.clone()));
        }
    }
    Ok(args)
}

/// Join key for an item: string fields as-is, numbers in decimal.
fn item_key(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn transport(global: &GlobalArgs) -> Result<Arc<dyn Transport>> {
    let mut config = HttpConfig::from_env();
    if let Some(url) = &global.base_url {
        config.base_url = url.clone();
    }
    if let Some(ms) = global.timeout_ms {
        config.timeout_ms = Some(ms);
    }
    let transport = HttpTransport::new(&config).context("failed to configure http transport")?;
    info!(base_url = %transport.base_url(), "transport ready");
    Ok(Arc::new(transport))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn run(cli: Cli) -> Result<()> {
    let transport = transport(&cli.global)?;

    match cli.command {
        Commands::Get { query } => {
            let resource = Resource::new(transport, ResourceConfig::default());
            let args = collect_args(&query.args, None)?;
            let entity = resource.get(&query.path, Some(&args)).await?;
            print_json(&entity)
        }
        Commands::Paged { query, page } => {
            let resource = Resource::new(transport, ResourceConfig::default());
            let args = collect_args(&query.args, Some(&page))?;
            let connection = resource.get_paginated_connection(&query.path, &args).await?;
            print_json(&connection)
        }
        Commands::Unpaged { query, page } => {
            let resource = Resource::new(transport, ResourceConfig::default());
            let args = collect_args(&query.args, Some(&page))?;
            let connection = resource.get_unpaginated_connection(&query.path, &args).await?;
            print_json(&connection)
        }
        Commands::Bulk {
            path,
            keys,
            param,
            key_field,
            chunk_size,
            dedupe,
        } => {
            let config = ResourceConfig {
                bulk: BulkConfig {
                    chunk_size,
                    dedupe_keys: dedupe,
                    ..Default::default()
                },
                ..Default::default()
            };
            let resource = Resource::new(transport, config);
            let loader = resource.bulk_loader(
                move |chunk: &[String]| {
                    let mut args = Map::new();
                    args.insert(param.clone(), Value::from(chunk.to_vec()));
                    build_path(&path, Some(&args)).into_string()
                },
                move |item: &Value| item_key(item, &key_field),
            )?;

            let results = loader.load_many(keys.iter().cloned()).await;
            let mut out = Map::new();
            for (key, result) in keys.into_iter().zip(results) {
                let value = match result {
                    Ok(items) => Value::Array(items),
                    Err(err) => serde_json::json!({ "error": err.to_string() }),
                };
                out.insert(key, value);
            }
            info!(chunks = loader.chunks_dispatched(), "bulk load complete");
            print_json(&out)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.quiet, cli.global.verbose);
    run(cli).await
}
