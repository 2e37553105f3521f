//! Recursive DNS resolver - walks the delegation tree from the root servers

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod metrics;
pub mod resolver;
pub mod transport;
pub mod types;
pub mod wire;

#[cfg(test)]
mod testutil;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Log timestamps in local time rather than UTC.
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "recursive-dns")]
#[command(about = "A recursive DNS resolver with an HTTP front end", long_about = None)]
struct Args {
    /// Optional configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Cache capacity: 0 disables caching, negative means unbounded
    #[arg(long, allow_hyphen_values = true)]
    cache_size: Option<i64>,

    /// Skip the IPv6 probe and resolve A records only
    #[arg(long)]
    no_ipv6: bool,
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("resolver-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cores))
}

async fn async_main(cores: usize) -> Result<()> {
    std::fs::create_dir_all("logs").unwrap_or_default();

    // Rolls at local midnight, keeping 30 days.
    let file_appender = RollingFileAppender::new(
        "logs/resolver.log",
        RollingConditionBasic::new().daily(),
        30,
    )?;

    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    let args = Args::parse();
    info!("Starting recursive-dns version {}", env!("CARGO_PKG_VERSION"));
    info!(">>> Running on {} worker threads", cores);

    let mut cfg = match &args.config {
        Some(path) => {
            let abs_path = std::fs::canonicalize(path)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| path.clone());
            info!(">>> Loading configuration from {}", abs_path);
            config::Config::load(&abs_path)?
        }
        None => config::Config::default(),
    };
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(size) = args.cache_size {
        cfg.cache_size = usize::try_from(size).ok();
    }
    info!(
        "{} root server(s), max depth {}, DNS port {}, cache {}",
        cfg.roots.len(),
        cfg.max_depth,
        cfg.dns_port,
        cfg.cache_size.map_or("unbounded".to_string(), |c| c.to_string())
    );

    let transport = transport::UdpTransport::new(cfg.timeout);
    let ipv6 = !args.no_ipv6
        && transport::probe_ipv6(&transport, config::IPV6_PROBE_SERVER, config::IPV6_PROBE_NAME, cfg.dns_port).await;

    let resolver = resolver::Resolver::from_config(transport, &cfg);
    let ctx = Arc::new(context::Context::new(cache::AnswerCache::new(cfg.cache_size), ipv6, resolver));

    let listener = tokio::net::TcpListener::bind(&cfg.listen).await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener on {}: {}", cfg.listen, e))?;

    tokio::select! {
        res = http::serve(listener, ctx) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
