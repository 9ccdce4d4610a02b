//! gm-server binary
//!
//! Distributes a graph over the workers listed in the config file and
//! collects the coloring, or colors it in-process with `--local`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gmcolor_graph::Color;
use gmcolor_worker::{
    init_tracing, read_worker_list, run_server, LocalAlgorithm, ServerConfig, DEFAULT_FILTER,
};

#[derive(Parser, Debug)]
#[command(name = "gm-server", about = "Distributed graph coloring server")]
struct Args {
    /// Worker list: one host:port per line, in node index order
    #[arg(short, long, required_unless_present = "local")]
    config: Option<PathBuf>,

    /// Graph to color
    #[arg(short, long)]
    graph: PathBuf,

    /// Write the colored graph here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Color in-process: sequential, parallel or parallel-chunked
    #[arg(long, conflicts_with = "config")]
    local: Option<LocalAlgorithm>,

    /// Color budget
    #[arg(long)]
    max_color: Option<Color>,

    /// Threads for local mode
    #[arg(short, long)]
    threads: Option<usize>,
}

fn config(args: &Args) -> gmcolor_worker::Result<ServerConfig> {
    let mut config = ServerConfig::new(&args.graph);
    if let Some(path) = &args.config {
        config = config.with_workers(read_worker_list(path)?);
    }
    if let Some(path) = &args.output {
        config = config.with_output(path);
    }
    if let Some(algorithm) = args.local {
        config = config.with_local(algorithm);
    }
    if let Some(max) = args.max_color {
        config = config.with_max_color(max);
    }
    if let Some(n) = args.threads {
        config = config.with_threads(n);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(DEFAULT_FILTER);

    let result = match config(&args) {
        Ok(config) => run_server(&config).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(summary) => {
            println!("{} colors", summary.colors_used);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
