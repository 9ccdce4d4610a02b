//! gm-worker binary
//!
//! One worker node of a distributed coloring run. It serves a single run
//! and exits.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use gmcolor_graph::Color;
use gmcolor_worker::{init_tracing, Worker, WorkerConfig, WorkerReport, DEFAULT_FILTER};

#[derive(Parser, Debug)]
#[command(name = "gm-worker", about = "Distributed graph coloring worker")]
struct Args {
    /// Port to accept the server and lower-indexed peers on
    #[arg(short, long)]
    port: u16,

    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    host: IpAddr,

    /// Chunks per round (overrides GM_THREADS)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Color budget (overrides GM_MAX_COLOR)
    #[arg(long)]
    max_color: Option<Color>,

    /// Give up on a round after this many seconds (overrides GM_ROUND_TIMEOUT)
    #[arg(long)]
    round_timeout: Option<u64>,
}

fn config(args: &Args) -> gmcolor_worker::Result<WorkerConfig> {
    let mut config = WorkerConfig::from_env(SocketAddr::new(args.host, args.port))?;
    if let Some(n) = args.threads {
        config = config.with_threads(n);
    }
    if let Some(max) = args.max_color {
        config = config.with_max_color(max);
    }
    if let Some(secs) = args.round_timeout {
        config = config.with_round_timeout(Duration::from_secs(secs));
    }
    Ok(config)
}

async fn run(args: &Args) -> gmcolor_worker::Result<WorkerReport> {
    let worker = Worker::bind(config(args)?).await?;
    worker.run().await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(DEFAULT_FILTER);

    match run(&args).await {
        Ok(report) => {
            tracing::info!(
                index = report.index,
                rounds = report.rounds,
                owned = report.owned,
                boundary = report.boundary,
                colors = report.colors_used,
                "run complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "worker failed");
            ExitCode::FAILURE
        }
    }
}
