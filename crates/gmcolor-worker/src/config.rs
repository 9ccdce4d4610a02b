//! Node configuration.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use gmcolor_color::default_threads;
use gmcolor_graph::{Color, MAX_WORKERS};

use crate::error::{Error, Result};

/// Color budget used when none is configured.
pub const DEFAULT_MAX_COLOR: Color = 256;

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid {name}: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Worker node configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Address the worker accepts the server and lower peers on.
    pub listen: SocketAddr,
    /// Chunks (and threads) per coloring round.
    pub n_threads: usize,
    /// Colors available to each vertex: `0..max_color`.
    pub max_color: Color,
    /// Limit on every barrier wait; `None` waits forever.
    pub round_timeout: Option<Duration>,
}

impl WorkerConfig {
    pub fn new(listen: SocketAddr) -> Self {
        Self {
            listen,
            n_threads: default_threads(),
            max_color: DEFAULT_MAX_COLOR,
            round_timeout: None,
        }
    }

    /// Defaults overridden by `GM_THREADS`, `GM_MAX_COLOR` and
    /// `GM_ROUND_TIMEOUT` (seconds).
    pub fn from_env(listen: SocketAddr) -> Result<Self> {
        let mut config = Self::new(listen);
        if let Some(n) = env_parse("GM_THREADS")? {
            config = config.with_threads(n);
        }
        if let Some(max) = env_parse("GM_MAX_COLOR")? {
            config = config.with_max_color(max);
        }
        if let Some(secs) = env_parse::<u64>("GM_ROUND_TIMEOUT")? {
            config = config.with_round_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn with_max_color(mut self, max_color: Color) -> Self {
        self.max_color = max_color;
        self
    }

    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_threads == 0 {
            return Err(Error::Config("thread count must be at least 1".into()));
        }
        if self.max_color == 0 {
            return Err(Error::Config("color budget must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0))
    }
}

/// In-process algorithm for local mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalAlgorithm {
    Sequential,
    /// One task per vertex.
    Parallel,
    /// One task per chunk.
    ParallelChunked,
}

impl FromStr for LocalAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel),
            "parallel-chunked" => Ok(Self::ParallelChunked),
            other => Err(format!(
                "unknown algorithm {other:?} (expected sequential, parallel or parallel-chunked)"
            )),
        }
    }
}

impl fmt::Display for LocalAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::ParallelChunked => "parallel-chunked",
        })
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Worker addresses in index order: entry `k` is node `k + 1`.
    pub workers: Vec<SocketAddrV4>,
    pub graph_path: PathBuf,
    /// Where to write the colored graph, if anywhere.
    pub output_path: Option<PathBuf>,
    /// Budget for local mode and for validating the collected result.
    pub max_color: Color,
    /// Threads for local mode.
    pub n_threads: usize,
    /// Color in-process instead of distributing to workers.
    pub local: Option<LocalAlgorithm>,
}

impl ServerConfig {
    pub fn new(graph_path: impl Into<PathBuf>) -> Self {
        Self {
            workers: Vec::new(),
            graph_path: graph_path.into(),
            output_path: None,
            max_color: DEFAULT_MAX_COLOR,
            n_threads: default_threads(),
            local: None,
        }
    }

    pub fn with_workers(mut self, workers: Vec<SocketAddrV4>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_max_color(mut self, max_color: Color) -> Self {
        self.max_color = max_color;
        self
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = n_threads;
        self
    }

    pub fn with_local(mut self, algorithm: LocalAlgorithm) -> Self {
        self.local = Some(algorithm);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.local.is_none() && self.workers.is_empty() {
            return Err(Error::Config("no workers configured".into()));
        }
        if self.workers.len() > MAX_WORKERS {
            return Err(Error::Config(format!(
                "{} workers configured, at most {MAX_WORKERS} supported",
                self.workers.len()
            )));
        }
        if self.n_threads == 0 || self.max_color == 0 {
            return Err(Error::Config(
                "thread count and color budget must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Parse the worker list: one `host:port` per line, blank lines and `#`
/// comments ignored. Host names must resolve to an IPv4 address, since
/// peers exchange addresses as 4-byte IPv4.
pub fn parse_worker_list(text: &str) -> Result<Vec<SocketAddrV4>> {
    text.lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.split('#').next().unwrap_or("").trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(n, line)| resolve_v4(line).map_err(|reason| {
            Error::Config(format!("worker list line {n}: {reason}"))
        }))
        .collect()
}

/// Read and parse a worker list file.
pub fn read_worker_list(path: impl AsRef<Path>) -> Result<Vec<SocketAddrV4>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let workers = parse_worker_list(&text)?;
    if workers.is_empty() {
        return Err(Error::Config(format!(
            "{} lists no workers",
            path.as_ref().display()
        )));
    }
    Ok(workers)
}

fn resolve_v4(entry: &str) -> std::result::Result<SocketAddrV4, String> {
    if let Ok(addr) = entry.parse::<SocketAddrV4>() {
        return Ok(addr);
    }
    let addrs = entry
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve {entry:?}: {e}"))?;
    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| format!("{entry:?} has no IPv4 address"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_list_skips_comments_and_blanks() {
        let text = "# cluster\n127.0.0.1:8001\n\n10.0.0.2:8002  # second\n";
        let workers = parse_worker_list(text).unwrap();
        assert_eq!(
            workers,
            vec![
                "127.0.0.1:8001".parse().unwrap(),
                "10.0.0.2:8002".parse().unwrap()
            ]
        );
    }

    #[test]
    fn worker_list_reports_line() {
        let err = parse_worker_list("127.0.0.1:1\nnot an address\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn empty_worker_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.txt");
        std::fs::write(&path, "# nothing here\n").unwrap();
        assert!(matches!(read_worker_list(&path), Err(Error::Config(_))));
    }

    #[test]
    fn builder_and_validation() {
        let config = WorkerConfig::default()
            .with_threads(3)
            .with_max_color(8)
            .with_round_timeout(Duration::from_secs(5));
        assert_eq!(config.n_threads, 3);
        assert_eq!(config.max_color, 8);
        assert_eq!(config.round_timeout, Some(Duration::from_secs(5)));
        config.validate().unwrap();
        assert!(WorkerConfig::default().with_threads(0).validate().is_err());
        assert!(WorkerConfig::default().with_max_color(0).validate().is_err());
    }

    #[test]
    fn server_needs_workers_unless_local() {
        let config = ServerConfig::new("g.txt");
        assert!(config.validate().is_err());
        config
            .clone()
            .with_local(LocalAlgorithm::Sequential)
            .validate()
            .unwrap();
        let addr: SocketAddrV4 = "127.0.0.1:9000".parse().unwrap();
        config
            .clone()
            .with_workers(vec![addr; MAX_WORKERS])
            .validate()
            .unwrap();
        // node count, server included, must fit in one byte
        assert!(config
            .with_workers(vec![addr; MAX_WORKERS + 1])
            .validate()
            .is_err());
    }

    #[test]
    fn algorithm_names() {
        for algo in [
            LocalAlgorithm::Sequential,
            LocalAlgorithm::Parallel,
            LocalAlgorithm::ParallelChunked,
        ] {
            assert_eq!(algo.to_string().parse::<LocalAlgorithm>().unwrap(), algo);
        }
        assert!("greedy".parse::<LocalAlgorithm>().is_err());
    }
}
