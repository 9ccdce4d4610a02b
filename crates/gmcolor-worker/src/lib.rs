//! Distributed Gebremedhin-Manne graph coloring.
//!
//! A server partitions the graph into contiguous vertex ranges, one per
//! worker, and hands each worker its index, the addresses of the workers
//! above it, and its partition. Workers form a full mesh and color in
//! rounds: speculate on pending vertices, push changed boundary colors to
//! their owners, wait for every peer's round report, then requeue the
//! vertices that lost a conflict. A run ends once no worker has pending
//! vertices, and the server collects the colored partitions.
//!
//! # Example
//!
//! ```ignore
//! use gmcolor_worker::{run_distributed, Worker, WorkerConfig};
//!
//! let worker = Worker::bind(WorkerConfig::new("127.0.0.1:7001".parse()?)).await?;
//! let handle = tokio::spawn(worker.run());
//! let colored = run_distributed(&["127.0.0.1:7001".parse()?], &graph, 64).await?;
//! assert!(colored.check_valid_coloring());
//! ```

pub mod barrier;
pub mod coloring;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod worker;

pub use barrier::RoundBarrier;
pub use coloring::{PartitionColoring, StoredColors};
pub use config::{
    parse_worker_list, read_worker_list, LocalAlgorithm, ServerConfig, WorkerConfig,
    DEFAULT_MAX_COLOR,
};
pub use engine::{await_peers, run_rounds};
pub use error::{Error, Result};
pub use handlers::{server_table, worker_table, ServerEvent, WorkerEvent};
pub use server::{run_distributed, run_local, run_server, RunSummary};
pub use state::{WorkerPhase, WorkerState};
pub use telemetry::{init_tracing, DEFAULT_FILTER};
pub use worker::{Worker, WorkerReport};
