//! End-to-end runs: a server and several workers over loopback TCP.

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use gmcolor_graph::{format, generate, Color, Graph};
use gmcolor_worker::{
    run_distributed, run_server, Error, LocalAlgorithm, Result, ServerConfig, Worker,
    WorkerConfig, WorkerReport,
};
use tokio::task::JoinHandle;
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(60);

async fn start_workers(
    n: usize,
    max_color: Color,
) -> (Vec<SocketAddrV4>, Vec<JoinHandle<Result<WorkerReport>>>) {
    let mut addrs = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..n {
        let config = WorkerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_threads(2)
            .with_max_color(max_color)
            .with_round_timeout(Duration::from_secs(20));
        let worker = Worker::bind(config).await.unwrap();
        let SocketAddr::V4(addr) = worker.local_addr().unwrap() else {
            panic!("bound to a non-IPv4 address");
        };
        addrs.push(addr);
        handles.push(tokio::spawn(worker.run()));
    }
    (addrs, handles)
}

async fn reports(handles: Vec<JoinHandle<Result<WorkerReport>>>) -> Vec<Result<WorkerReport>> {
    let mut out = Vec::new();
    for handle in handles {
        out.push(timeout(LIMIT, handle).await.unwrap().unwrap());
    }
    out
}

fn joined_paths() -> Graph {
    // two paths 0-4 and 5-9 joined by the single edge 4-5
    let mut g = Graph::new(10);
    for v in (0..4).chain(5..9) {
        g.add_undirected_edge(v, v + 1).unwrap();
    }
    g.add_undirected_edge(4, 5).unwrap();
    g
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_workers_resolve_the_boundary_edge() {
    let graph = joined_paths();
    let (addrs, handles) = start_workers(2, 3).await;

    let colored = timeout(LIMIT, run_distributed(&addrs, &graph, 3))
        .await
        .unwrap()
        .unwrap();
    assert!(colored.check_valid_coloring());
    assert_ne!(colored.vertices[4].color, colored.vertices[5].color);

    let reports: Vec<_> = reports(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(reports[0].index, 1);
    assert_eq!(reports[1].index, 2);
    for report in &reports {
        assert_eq!(report.owned, 5);
        assert_eq!(report.boundary, 1);
        assert!(report.rounds >= 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn three_workers_on_padded_partitions() {
    let graph = generate::random_seeded(50, 6.0, 3);
    let max_color = graph.max_degree() as Color + 1;
    let (addrs, handles) = start_workers(3, max_color).await;

    let colored = timeout(LIMIT, run_distributed(&addrs, &graph, max_color))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(colored.len(), 50);
    assert!(colored.check_valid_coloring());
    assert!(colored.color_count() <= max_color as usize);

    let reports = reports(handles).await;
    let owned: usize = reports.iter().map(|r| r.as_ref().unwrap().owned).sum();
    // ceil(50 / 3) = 17 per worker, one padding vertex
    assert_eq!(owned, 51);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_worker_run() {
    let graph = generate::ring(8);
    let (addrs, handles) = start_workers(1, 3).await;

    let colored = timeout(LIMIT, run_distributed(&addrs, &graph, 3))
        .await
        .unwrap()
        .unwrap();
    assert!(colored.check_valid_coloring());
    let report = reports(handles).await.remove(0).unwrap();
    assert_eq!(report.boundary, 0);
    assert!(report.colors_used <= 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_budget_fails_every_node() {
    let graph = generate::complete(6);
    let (addrs, handles) = start_workers(2, 3).await;

    let result = timeout(LIMIT, run_distributed(&addrs, &graph, 3))
        .await
        .unwrap();
    assert!(result.is_err());

    let reports = reports(handles).await;
    assert!(reports.iter().any(|r| matches!(r, Err(Error::Coloring(_)))));
    assert!(reports.iter().all(Result::is_err));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_writes_the_colored_graph() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("graph.txt");
    let output = dir.path().join("colored.txt");
    let graph = generate::random_seeded(40, 4.0, 11);
    let max_color = graph.max_degree() as Color + 1;
    format::write_file(&input, &graph).unwrap();

    let (addrs, handles) = start_workers(2, max_color).await;
    let config = ServerConfig::new(&input)
        .with_workers(addrs)
        .with_output(&output)
        .with_max_color(max_color);
    let summary = timeout(LIMIT, run_server(&config)).await.unwrap().unwrap();
    assert!(summary.rounds.is_none());

    let written = format::read_file(&output).unwrap();
    assert_eq!(written, summary.graph);
    assert!(written.check_valid_coloring());
    assert_eq!(written.color_count(), summary.colors_used);
    for report in reports(handles).await {
        report.unwrap();
    }
}

#[tokio::test]
async fn local_mode_needs_no_workers() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("graph.txt");
    format::write_file(&input, &generate::ring(9)).unwrap();

    let config = ServerConfig::new(&input)
        .with_local(LocalAlgorithm::ParallelChunked)
        .with_max_color(3)
        .with_threads(2);
    let summary = run_server(&config).await.unwrap();
    assert!(summary.graph.check_valid_coloring());
    assert!(summary.rounds.is_some());
    assert!(summary.colors_used <= 3);
}
