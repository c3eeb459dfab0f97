//! corosync-exporter - Prometheus exporter for corosync runtime statistics.
//!
//! Resolves the cluster node map once at startup, then serves `/metrics`,
//! refreshing from `corosync-cmapctl` on every scrape.

mod handlers;
mod state;

use std::net::SocketAddr;
use std::process;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use corosync_exporter_core::collector::{CmapctlSource, Collector, MemoryProbe, RealFs};
use corosync_exporter_core::util::get_hostname;

/// Prometheus exporter for corosync statistics.
#[derive(Parser)]
#[command(name = "corosync-exporter", about = "Prometheus exporter for corosync statistics", version = corosync_exporter_core::VERSION)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:8000", env = "COROSYNC_EXPORTER_LISTEN")]
    listen: String,

    /// Path to the corosync-cmapctl binary.
    #[arg(long, default_value = "corosync-cmapctl", env = "COROSYNC_EXPORTER_CMAPCTL")]
    cmapctl: String,

    /// Timeout for a single corosync-cmapctl invocation, in seconds.
    #[arg(long, default_value = "10", env = "COROSYNC_EXPORTER_TIMEOUT")]
    timeout: u64,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Process name of the daemon whose memory is reported as corosync_rss.
    #[arg(long, default_value = "corosync")]
    process_name: String,

    /// Value of the hostname label. Defaults to the machine hostname.
    #[arg(long, env = "COROSYNC_EXPORTER_HOSTNAME")]
    hostname: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber. `RUST_LOG` directives are honored in
/// addition to the level picked by `-v` / `-q`.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for crate_name in ["corosync_exporter", "corosync_exporter_core"] {
        match format!("{}={}", crate_name, level).parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("invalid log directive for {}: {}", crate_name, e),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    info!(version = corosync_exporter_core::VERSION, "corosync-exporter starting");

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let hostname = args.hostname.clone().unwrap_or_else(get_hostname);
    let source =
        CmapctlSource::new(&args.cmapctl).with_timeout(Duration::from_secs(args.timeout));
    let probe = MemoryProbe::new(RealFs::new(), &args.proc_path)
        .with_process_name(&args.process_name);

    info!(
        cmapctl = %args.cmapctl,
        timeout_s = args.timeout,
        proc = %args.proc_path,
        process = %args.process_name,
        "config"
    );

    // The node map must be complete before any label is produced.
    let collector = match Collector::new(source, probe, hostname) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to resolve corosync node map");
            process::exit(1);
        }
    };
    info!(
        nodes = collector.classifier().nodes().len(),
        hostname = collector.classifier().hostname(),
        "node map resolved"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    runtime.block_on(serve(addr, state::shared(collector)));
}

async fn serve(addr: SocketAddr, state: state::SharedState) {
    let app = handlers::router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
