//! Cluster regression tests.
//!
//! Wires a supervisor (with in-memory workers fronting real HTTP apps) to
//! the health surface and the front proxy, the way `forkd master` does.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tower::ServiceExt;

use forkgrid_balancer::LoadBalancer;
use forkgrid_core::{BalanceStrategy, ClusterConfig, ScalingThresholds, ShutdownPhase};
use forkgrid_master::Supervisor;
use forkgrid_pool::testing::ManualSpawner;
use forkgrid_worker::{AppServer, HttpApp, demo_router};

fn config(workers: u32) -> ClusterConfig {
    ClusterConfig {
        initial_workers: Some(workers),
        thresholds: ScalingThresholds {
            min_workers: 1,
            max_workers: 4,
            ..ScalingThresholds::default()
        },
        ..ClusterConfig::default()
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

async fn get_status(router: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn health_is_degraded_until_workers_are_online() {
    let (spawner, mut log) = ManualSpawner::new();
    let mut supervisor = Supervisor::new(config(2), spawner);
    supervisor.start().await.unwrap();
    let mut reports = supervisor.subscribe_reports();
    let router = forkgrid_api::build_router(reports.clone());

    let (status, json) = get_status(router.clone(), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["workers"]["total"], 0);
    assert_eq!(json["workers"]["healthy"], 0);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let master = tokio::spawn(async move {
        supervisor
            .run(async {
                let _ = stop_rx.await;
            })
            .await
    });

    for (i, worker) in log.drain().into_iter().enumerate() {
        worker.ready(4100 + i as u16);
        worker.behave();
    }
    tokio::time::timeout(Duration::from_secs(5), reports.wait_for(|r| r.health.is_healthy()))
        .await
        .unwrap()
        .unwrap();

    let (status, json) = get_status(router.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["workers"]["healthPercentage"], 100.0);

    let (status, json) = get_status(router.clone(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["workers"].as_array().unwrap().len(), 2);

    stop_tx.send(()).unwrap();
    let report = master.await.unwrap().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.stopped, 2);
    assert_eq!(reports.borrow().phase, ShutdownPhase::Terminated);

    let (status, _) = get_status(router, "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn proxy_spreads_connections_over_online_workers() {
    let (spawner, mut log) = ManualSpawner::new();
    let mut supervisor = Supervisor::new(config(2), spawner);
    supervisor.start().await.unwrap();
    let mut backends = supervisor.subscribe_backends();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let master = tokio::spawn(async move {
        supervisor
            .run(async {
                let _ = stop_rx.await;
            })
            .await
    });

    // Each fake worker fronts a real application server.
    let mut apps = Vec::new();
    for worker in log.drain() {
        let mut app = HttpApp::new(demo_router(Some(worker.id)), SocketAddr::from(([127, 0, 0, 1], 0)));
        let addr = app.start().await.unwrap();
        worker.ready(addr.port());
        worker.behave();
        apps.push(app);
    }
    tokio::time::timeout(Duration::from_secs(5), backends.wait_for(|b| b.len() == 2))
        .await
        .unwrap()
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let front = listener.local_addr().unwrap();
    let balancer = Arc::new(LoadBalancer::new(BalanceStrategy::RoundRobin, backends));
    let (proxy_stop, proxy_stop_rx) = watch::channel(false);
    let proxy = tokio::spawn(forkgrid_balancer::serve(listener, balancer, proxy_stop_rx));

    let mut greeted = BTreeSet::new();
    for _ in 0..4 {
        let response = http_get(front, "/").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        let line = response.lines().last().unwrap().to_string();
        greeted.insert(line);
    }
    assert_eq!(
        greeted,
        BTreeSet::from([
            "hello from worker 1".to_string(),
            "hello from worker 2".to_string()
        ])
    );

    proxy_stop.send(true).unwrap();
    proxy.await.unwrap().unwrap();
    stop_tx.send(()).unwrap();
    master.await.unwrap().unwrap();
    for mut app in apps {
        app.stop().await.unwrap();
    }
}
