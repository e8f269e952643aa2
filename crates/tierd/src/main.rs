//! ToonTier Daemon - RESP server in front of a two-level record cache

mod demo;
mod handler;
mod resp;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use bytes::BytesMut;
use clap::{Args, Parser, Subcommand};
use tiercache::{CacheConfig, CacheCoordinator, LocalCacheScope};
use tierstore::{Lookup, RecordStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::handler::{CommandHandler, Coordinator};
use crate::resp::RespValue;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve sessions over RESP
    Serve(ServeArgs),
    /// Seed a store and replay the caching walkthrough
    Demo {
        /// Data directory
        #[arg(short, long, default_value = "./demo-data")]
        data: PathBuf,
    },
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1:6379")]
    bind: String,

    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// Shared cache capacity per namespace (number of entries)
    #[arg(short, long, default_value_t = 10000)]
    capacity: usize,

    /// Clear the namespace's shared cache after every write
    #[arg(long)]
    flush_shared_on_write: bool,

    /// Disable the shared tier entirely
    #[arg(long)]
    no_shared_cache: bool,

    /// Skip session-tier hits; fetched rows are still promoted on close
    #[arg(long)]
    statement_scope: bool,

    /// Statement mapping, `ns.stmt=id` or `ns.stmt=field:name` (repeatable)
    #[arg(long = "map", value_parser = parse_mapping)]
    mappings: Vec<StatementMapping>,

    /// Health check mode (for Docker)
    #[arg(long)]
    health: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct StatementMapping {
    namespace: String,
    statement: String,
    lookup: Lookup,
}

fn parse_mapping(s: &str) -> Result<StatementMapping, String> {
    let (name, strategy) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ns.stmt=LOOKUP, got '{}'", s))?;
    let (namespace, statement) = name
        .split_once('.')
        .ok_or_else(|| format!("expected ns.stmt, got '{}'", name))?;
    if namespace.is_empty() || statement.is_empty() {
        return Err(format!("empty namespace or statement in '{}'", s));
    }

    let lookup = match strategy.split_once(':') {
        None if strategy.eq_ignore_ascii_case("id") => Lookup::ById,
        Some((kind, field)) if kind.eq_ignore_ascii_case("field") && !field.is_empty() => {
            Lookup::ByField(field.to_string())
        }
        _ => return Err(format!("unknown lookup '{}', use id or field:<name>", strategy)),
    };

    Ok(StatementMapping {
        namespace: namespace.to_string(),
        statement: statement.to_string(),
        lookup,
    })
}

impl ServeArgs {
    fn cache_config(&self) -> CacheConfig {
        let scope = if self.statement_scope {
            LocalCacheScope::Statement
        } else {
            LocalCacheScope::Session
        };
        CacheConfig::new()
            .with_cache_enabled(!self.no_shared_cache)
            .with_local_scope(scope)
            .with_flush_shared_on_write(self.flush_shared_on_write)
            .with_shared_capacity(self.capacity)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match Cli::parse().command {
        Command::Serve(args) => serve(args).await,
        Command::Demo { data } => demo::run(&data),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    if args.health {
        match TcpStream::connect(&args.bind).await {
            Ok(_) => {
                println!("OK");
                std::process::exit(0);
            }
            Err(_) => {
                eprintln!("FAILED");
                std::process::exit(1);
            }
        }
    }

    info!("Starting ToonTier Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {}", args.data.display());

    std::fs::create_dir_all(&args.data)?;
    let store = RecordStore::open(&args.data)?;
    for mapping in &args.mappings {
        info!(
            namespace = %mapping.namespace,
            statement = %mapping.statement,
            lookup = ?mapping.lookup,
            "statement mapped"
        );
        store.map_statement(&mapping.namespace, &mapping.statement, mapping.lookup.clone());
    }
    info!(rows = store.len(), "Database opened successfully");

    let cache = Arc::new(CacheCoordinator::new(store, args.cache_config()));

    let listener = TcpListener::bind(&args.bind).await?;
    info!("Server listening on {}", args.bind);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let cache = Arc::clone(&cache);

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, cache).await {
                            error!("Error handling client {}: {}", addr, e);
                        }
                        info!("Connection closed: {}", addr);
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    cache.shutdown();
    cache.store().close()?;
    Ok(())
}

async fn handle_client(mut stream: TcpStream, cache: Arc<Coordinator>) -> Result<()> {
    let mut handler = CommandHandler::new(cache);
    let mut buffer = BytesMut::with_capacity(4096);
    let mut out = BytesMut::with_capacity(4096);

    loop {
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            return Ok(());
        }

        loop {
            match RespValue::parse(&mut buffer) {
                Ok(Some(cmd)) => handler.handle(cmd).write_to(&mut out),
                Ok(None) => break,
                Err(e) => {
                    warn!("Parse error: {}", e);
                    RespValue::err(e).write_to(&mut out);
                    buffer.clear();
                    break;
                }
            }
        }

        if !out.is_empty() {
            stream.write_all(&out).await?;
            out.clear();
        }
    }
}
