use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use axum::{routing::get, Router};
use bytes::Bytes;
use clap::Parser;
use georoute_proxy::config::{BackendConfig, Config, Environment};
use georoute_proxy::http::build_router;
use georoute_proxy::ProxyApp;
use http_body_util::Full;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use tokio::sync::Barrier;

#[derive(Parser, Debug)]
#[command(author, version, about = "Benchmark for georoute-proxy")]
struct Args {
    /// Number of concurrent clients
    #[arg(short, long, default_value_t = 50)]
    concurrency: usize,

    /// Duration of the benchmark in seconds
    #[arg(short, long, default_value_t = 10)]
    duration: u64,
}

/// Spawn a mock upstream that always answers 200 OK.
async fn start_mock_upstream() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let app = Router::new().route("/", get(|| async { "ok" }));
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Build the dispatcher in-process against a single mock backend, returning
/// the address a plain hyper client can hit.
async fn start_router(upstream_addr: SocketAddr) -> SocketAddr {
    let config = Config {
        port: 0,
        environment: Environment::Production,
        backends: vec![BackendConfig {
            url: format!("http://{upstream_addr}"),
            region: "us-west".to_string(),
            weight: 1,
        }],
        retry_attempts: 0,
        enable_caching: false,
        cache_max_age: 300,
        health_check_interval_ms: 30_000,
        circuit_breaker_threshold: 5,
    };

    let app_state = Arc::new(ProxyApp::build(config));
    let router = build_router(app_state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let upstream_addr = start_mock_upstream().await;
    println!("Mock upstream listening on {}", upstream_addr);

    let router_addr = start_router(upstream_addr).await;
    println!("Proxy listening on {}", router_addr);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let target_url = format!("http://{}/", router_addr);
    let client: Client<hyper_util::client::legacy::connect::HttpConnector, Full<Bytes>> =
        Client::builder(TokioExecutor::new()).build_http();

    let start_time = Instant::now();
    let duration = std::time::Duration::from_secs(args.duration);
    let success_count = Arc::new(AtomicUsize::new(0));
    let error_count = Arc::new(AtomicUsize::new(0));
    let latencies = Arc::new(tokio::sync::Mutex::new(Vec::new()));

    let barrier = Arc::new(Barrier::new(args.concurrency));
    let mut handles = Vec::new();

    println!(
        "Starting benchmark: {} clients, {} seconds...",
        args.concurrency, args.duration
    );

    for _ in 0..args.concurrency {
        let client = client.clone();
        let success_count = success_count.clone();
        let error_count = error_count.clone();
        let latencies = latencies.clone();
        let barrier = barrier.clone();
        let target_url = target_url.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut local_latencies = Vec::new();

            while start_time.elapsed() < duration {
                let req_start = Instant::now();
                let req = hyper::Request::builder()
                    .method("GET")
                    .uri(&target_url)
                    .body(Full::new(Bytes::new()))
                    .unwrap();

                match client.request(req).await {
                    Ok(_) => {
                        local_latencies.push(req_start.elapsed().as_micros() as u64);
                        success_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        eprintln!("Request failed: {}", e);
                        error_count.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            let mut l = latencies.lock().await;
            l.extend(local_latencies);
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    let total_success = success_count.load(Ordering::Relaxed);
    let total_errors = error_count.load(Ordering::Relaxed);
    let elapsed = start_time.elapsed().as_secs_f64();
    let rps = total_success as f64 / elapsed;

    let mut latencies = latencies.lock().await;
    latencies.sort();

    let avg = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<u64>() as f64 / latencies.len() as f64 / 1000.0
    };

    let p50 = latencies.get(latencies.len() / 2).copied().unwrap_or(0) as f64 / 1000.0;

    let p99_idx = ((latencies.len() as f64) * 0.99) as usize;
    let p99 = latencies.get(p99_idx).copied().unwrap_or(0) as f64 / 1000.0;

    let p999_idx = ((latencies.len() as f64) * 0.999) as usize;
    let p999 = latencies.get(p999_idx).copied().unwrap_or(0) as f64 / 1000.0;

    println!("\n--- Benchmark Results ---");
    println!("Duration:        {:.2}s", elapsed);
    println!("Concurrency:     {}", args.concurrency);
    println!("Total Requests:  {}", total_success + total_errors);
    println!("Successful:      {}", total_success);
    println!("Errors:          {}", total_errors);
    println!("RPS:             {:.2}", rps);
    println!("Avg Latency:     {:.2}ms", avg);
    println!("P50 Latency:     {:.2}ms", p50);
    println!("P99 Latency:     {:.2}ms", p99);
    println!("P99.9 Latency:   {:.2}ms", p999);
}
