use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Path;
use axum::routing::get;
use axum::Router;
use futures::future::BoxFuture;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use gateway_metrics::instrumentation::{Dimensions, MetricKind};
use gateway_metrics::sink::{BatchWriter, BufferedSink, MemorySink};
use gateway_metrics::{
    BackendConfig, BackendStyle, InstrumentationConfig, InstrumentationLayer, MetricPoint,
    SinkError,
};

fn config(style: BackendStyle, remove_ids: bool) -> InstrumentationConfig {
    InstrumentationConfig {
        remove_ids,
        backend: BackendConfig {
            style,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn app(layer: InstrumentationLayer) -> Router {
    Router::new()
        .route("/", get(|| async { "root" }))
        .route("/users/:id", get(|Path(id): Path<String>| async move { id }))
        .route(
            "/users/:id/orders/:order_id",
            get(|Path((id, order)): Path<(String, String)>| async move {
                format!("{}:{}", id, order)
            }),
        )
        .fallback(|| async { (StatusCode::NOT_FOUND, "not found") })
        .layer(layer)
}

fn get_request(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(http::header::HOST, "api.example.com")
        .body(Body::empty())
        .unwrap()
}

async fn drain(response: http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_tagged_request_emits_one_timing() {
    let sink = Arc::new(MemorySink::new());
    let layer = InstrumentationLayer::with_sink(&config(BackendStyle::Tagged, false), sink.clone())
        .unwrap();

    let response = app(layer).oneshot(get_request("/users/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(drain(response).await, "42");

    assert_eq!(sink.emission_count(), 1);
    let points = sink.points();
    assert_eq!(points.len(), 1);

    let point = &points[0];
    assert_eq!(point.name, "request_duration");
    assert_eq!(point.kind, MetricKind::Timing);
    assert!(point.value >= 0.0);
    assert_eq!(point.tag("path"), Some("/users/42"));
    assert_eq!(point.tag("method"), Some("GET"));
    assert_eq!(point.tag("status_code"), Some("200"));
    assert_eq!(point.tag("host"), Some("api.example.com"));
    assert_eq!(point.tag("service"), Some("apigateway"));
}

#[tokio::test]
async fn test_ids_are_removed_from_paths() {
    let sink = Arc::new(MemorySink::new());
    let layer = InstrumentationLayer::with_sink(&config(BackendStyle::Tagged, true), sink.clone())
        .unwrap();

    let user = uuid::Uuid::new_v4();
    let path = format!("/users/{}/orders/42", user);
    let response = app(layer).oneshot(get_request(&path)).await.unwrap();
    drain(response).await;

    let points = sink.points();
    assert_eq!(points[0].tag("path"), Some("/users/_id_/orders/_id_"));
}

#[tokio::test]
async fn test_unmatched_route_reports_status() {
    let sink = Arc::new(MemorySink::new());
    let layer = InstrumentationLayer::with_sink(&config(BackendStyle::Tagged, true), sink.clone())
        .unwrap();

    let response = app(layer).oneshot(get_request("/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    drain(response).await;

    assert_eq!(sink.emission_count(), 1);
    assert_eq!(sink.points()[0].tag("status_code"), Some("404"));
}

#[tokio::test]
async fn test_hierarchical_keys() {
    let sink = Arc::new(MemorySink::new());
    let layer =
        InstrumentationLayer::with_sink(&config(BackendStyle::Hierarchical, true), sink.clone())
            .unwrap();

    let response = app(layer).oneshot(get_request("/users/7")).await.unwrap();
    drain(response).await;

    let points = sink.points();
    let keys: Vec<&str> = points.iter().map(MetricPoint::key).collect();
    assert_eq!(
        keys,
        vec![
            "response_code.200",
            "response_code.users._id_.200",
            "response_time.users._id_",
        ]
    );
    assert_eq!(points[0].kind, MetricKind::Counter);
    assert_eq!(points[0].value, 1.0);
    assert_eq!(points[2].kind, MetricKind::Timing);
}

#[tokio::test]
async fn test_hierarchical_root_path() {
    let sink = Arc::new(MemorySink::new());
    let layer =
        InstrumentationLayer::with_sink(&config(BackendStyle::Hierarchical, false), sink.clone())
            .unwrap();

    let response = app(layer).oneshot(get_request("/")).await.unwrap();
    drain(response).await;

    let points = sink.points();
    assert_eq!(points[1].key(), "response_code.root.200");
    assert_eq!(points[2].key(), "response_time.root");
}

#[tokio::test]
async fn test_aborted_response_without_status() {
    let sink = Arc::new(MemorySink::new());
    let layer =
        InstrumentationLayer::with_sink(&config(BackendStyle::Hierarchical, true), sink.clone())
            .unwrap();

    let response = app(layer).oneshot(get_request("/users/7")).await.unwrap();
    drop(response);

    assert_eq!(sink.emission_count(), 0);
    assert!(sink.points().is_empty());
}

#[tokio::test]
async fn test_aborted_tagged_response_omits_status() {
    let sink = Arc::new(MemorySink::new());
    let layer = InstrumentationLayer::with_sink(&config(BackendStyle::Tagged, true), sink.clone())
        .unwrap();

    let response = app(layer).oneshot(get_request("/users/7")).await.unwrap();
    drop(response);

    let points = sink.points();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].tag("status_code"), None);
    assert_eq!(points[0].tag("path"), Some("/users/_id_"));
}

#[tokio::test]
async fn test_invalid_pattern_is_rejected() {
    let mut config = config(BackendStyle::Tagged, true);
    config.remove_ids_regex = "([0-9".to_string();

    let result = InstrumentationLayer::with_sink(&config, Arc::new(MemorySink::new()));
    assert!(result.is_err());
}

#[derive(Clone, Default)]
struct RecordingWriter {
    batches: Arc<Mutex<Vec<Vec<MetricPoint>>>>,
}

impl BatchWriter for RecordingWriter {
    fn write_batch<'a>(&'a self, batch: &'a [MetricPoint]) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(async move {
            self.batches.lock().push(batch.to_vec());
            Ok(())
        })
    }
}

#[tokio::test]
async fn test_line_points_are_flushed_on_shutdown() {
    let writer = RecordingWriter::default();
    let mut config = config(BackendStyle::Line, true);
    config.backend.application = "checkout".to_string();

    let sink = Arc::new(BufferedSink::spawn(
        writer.clone(),
        config.backend.buffer_size,
        Duration::from_secs(60),
    ));
    let layer = InstrumentationLayer::with_sink(&config, sink.clone()).unwrap();
    let app = app(layer.clone());

    for path in ["/users/1", "/users/2"] {
        let response = app.clone().oneshot(get_request(path)).await.unwrap();
        drain(response).await;
    }
    assert_eq!(sink.pending(), 2);
    assert!(writer.batches.lock().is_empty());

    layer.shutdown().await;

    let batches = writer.batches.lock().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);

    let point = &batches[0][0];
    assert_eq!(point.name, "requests");
    assert_eq!(point.tag("application"), Some("checkout"));
    assert_eq!(point.tag("path"), Some("/users/_id_"));
    assert!(matches!(point.dimensions, Dimensions::Tags(_)));
}

fn bodiless_app(layer: InstrumentationLayer) -> Router {
    Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route(
            "/not-modified",
            get(|| async { (StatusCode::NOT_MODIFIED, "stale body") }),
        )
        .route(
            "/no-content",
            get(|| async { (StatusCode::NO_CONTENT, "ignored body") }),
        )
        .layer(layer)
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn send_raw(addr: SocketAddr, method: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: api.example.com\r\nConnection: close\r\n\r\n",
        method, path
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

async fn wait_for_emission(sink: &MemorySink) {
    for _ in 0..100 {
        if sink.emission_count() > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_served_responses_without_body_keep_status() {
    let cases = [
        ("GET", "/ok", "200"),
        ("HEAD", "/ok", "200"),
        ("GET", "/not-modified", "304"),
        ("GET", "/no-content", "204"),
    ];

    for (method, path, status) in cases {
        let sink = Arc::new(MemorySink::new());
        let layer =
            InstrumentationLayer::with_sink(&config(BackendStyle::Tagged, false), sink.clone())
                .unwrap();
        let addr = serve(bodiless_app(layer)).await;

        let response = send_raw(addr, method, path).await;
        assert!(
            response.starts_with(&format!("HTTP/1.1 {}", status)),
            "{} {} answered {:?}",
            method,
            path,
            response
        );
        wait_for_emission(&sink).await;

        let points = sink.points();
        assert_eq!(points.len(), 1, "{} {}", method, path);
        assert_eq!(points[0].tag("method"), Some(method));
        assert_eq!(points[0].tag("status_code"), Some(status), "{} {}", method, path);
    }
}

#[tokio::test]
async fn test_served_not_modified_emits_hierarchical_keys() {
    let sink = Arc::new(MemorySink::new());
    let layer =
        InstrumentationLayer::with_sink(&config(BackendStyle::Hierarchical, false), sink.clone())
            .unwrap();
    let addr = serve(bodiless_app(layer)).await;

    let response = send_raw(addr, "GET", "/not-modified").await;
    assert!(response.starts_with("HTTP/1.1 304"));
    wait_for_emission(&sink).await;

    let points = sink.points();
    let keys: Vec<&str> = points.iter().map(MetricPoint::key).collect();
    assert_eq!(
        keys,
        vec![
            "response_code.304",
            "response_code.not-modified.304",
            "response_time.not-modified",
        ]
    );
}
