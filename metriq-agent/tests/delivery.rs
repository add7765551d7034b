//! Delivery against a real HTTP listener.

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use metriq_agent::{
    DeliveryError, Pipeline, RetryPolicy, RetryableError, Transport, send_metrics_batch,
};
use metriq_common::codec::sign;
use metriq_common::{Decoder, Encoder, HASH_HEADER, Metric, decode_batch};
use metriq_storage::{MemRepository, Repository};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type Seen = Arc<Mutex<Vec<(HeaderMap, Vec<u8>)>>>;

#[derive(Clone)]
struct Recorder {
    seen: Seen,
    status: StatusCode,
}

async fn record(State(rec): State<Recorder>, headers: HeaderMap, body: Bytes) -> StatusCode {
    rec.seen.lock().unwrap().push((headers, body.to_vec()));
    rec.status
}

async fn serve(status: StatusCode) -> (SocketAddr, Seen) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, serve_on(listener, status))
}

fn serve_on(listener: tokio::net::TcpListener, status: StatusCode) -> Seen {
    let seen = Seen::default();
    let app = Router::new().route("/updates", post(record)).with_state(Recorder {
        seen: seen.clone(),
        status,
    });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    seen
}

async fn refused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        start_interval: Duration::from_millis(10),
        step: Duration::from_millis(10),
    }
}

fn transport(addr: SocketAddr, encoder: Encoder) -> Transport {
    Transport::new(&addr.to_string(), Duration::from_secs(5), encoder, fast_policy()).unwrap()
}

fn batch() -> Vec<Metric> {
    vec![
        Metric::gauge("Alloc", 42.5),
        Metric::counter("PollCount", 3),
    ]
}

#[tokio::test]
async fn test_signed_batch_reaches_collector() {
    let (addr, seen) = serve(StatusCode::OK).await;
    let transport = transport(addr, Encoder::new(Some(b"secret".to_vec()), None));

    let status = transport.send(&batch()).await.unwrap();
    assert_eq!(status.as_u16(), 200);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let (headers, body) = &seen[0];
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(headers["content-encoding"], "application/gzip");

    let signature = headers[HASH_HEADER].to_str().unwrap();
    assert!(sign::verify(b"secret", body, signature).is_ok());

    let plain = Decoder::new(Some(b"secret".to_vec()), None)
        .decode(body, Some(signature), true)
        .unwrap();
    assert_eq!(decode_batch(&plain).unwrap(), batch());
}

#[tokio::test]
async fn test_unsigned_batch_has_no_hash_header() {
    let (addr, seen) = serve(StatusCode::OK).await;
    transport(addr, Encoder::default()).send(&batch()).await.unwrap();
    assert!(!seen.lock().unwrap()[0].0.contains_key(HASH_HEADER));
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let (addr, seen) = serve(StatusCode::BAD_REQUEST).await;
    let status = transport(addr, Encoder::default()).send(&batch()).await.unwrap();
    assert_eq!(status.as_u16(), 400);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_refused_connection_is_retried_then_surfaced() {
    let addr = refused_addr().await;
    let started = Instant::now();

    let err = transport(addr, Encoder::default()).send(&batch()).await.unwrap_err();

    assert!(matches!(err, DeliveryError::Transport(_)));
    assert!(err.is_retryable());
    // 10ms + 20ms + 30ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(60));
}

#[tokio::test]
async fn test_empty_repository_sends_nothing() {
    // nothing listens here; any request would fail
    let addr = refused_addr().await;
    let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
    let result = send_metrics_batch(repo, Arc::new(transport(addr, Encoder::default()))).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_pipeline_reports_snapshot_each_interval() {
    let (addr, seen) = serve(StatusCode::OK).await;
    let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
    repo.set_metrics(batch()).unwrap();

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(
        Arc::clone(&repo),
        Arc::new(transport(addr, Encoder::default())),
        Duration::from_millis(50),
        2,
    );
    let handle = tokio::spawn(pipeline.run(cancel.clone()));

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("two reports arrive");

    cancel.cancel();
    handle.await.unwrap();

    let seen = seen.lock().unwrap();
    let plain = Decoder::default().decode(&seen[0].1, None, true).unwrap();
    let mut sent = decode_batch(&plain).unwrap();
    sent.sort_by(|a, b| a.name.cmp(&b.name));
    // PollCount: 3 from the batch plus 1 for the Alloc gauge
    assert_eq!(
        sent,
        vec![Metric::gauge("Alloc", 42.5), Metric::counter("PollCount", 4)]
    );
}

#[tokio::test]
async fn test_pipeline_keeps_reporting_after_failed_jobs() {
    let addr = refused_addr().await;
    let repo: Arc<dyn Repository> = Arc::new(MemRepository::new());
    repo.set_metrics(batch()).unwrap();

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::new(
        Arc::clone(&repo),
        Arc::new(transport(addr, Encoder::default())),
        Duration::from_millis(50),
        1,
    );
    let handle = tokio::spawn(pipeline.run(cancel.clone()));

    // several intervals pass with the collector down
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!handle.is_finished());

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let seen = serve_on(listener, StatusCode::OK);

    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("a later report arrives once the collector is up");

    cancel.cancel();
    handle.await.unwrap();

    let seen = seen.lock().unwrap();
    let plain = Decoder::default().decode(&seen[0].1, None, true).unwrap();
    assert_eq!(decode_batch(&plain).unwrap().len(), 2);
}
