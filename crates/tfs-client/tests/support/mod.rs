//! In-process TFS stand-in: one hyper server acting as both the root
//! directory server (`/tfs.list`) and the only storage agent.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tfs_client::ClientConfig;
use tokio::net::TcpListener;

pub const APP_ID: &str = "8";
pub const IMAGE_HOST: &str = "img.test";

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Path and query
    pub uri: String,
    pub body: Bytes,
}

pub struct MockResponse {
    pub status: u16,
    pub body: Bytes,
}

impl MockResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::ok(serde_json::to_vec(&value).unwrap())
    }
}

/// Answers the requests a healthy agent would: the application id, an
/// upload name, and an empty 200 for everything else.
pub fn default_routes(req: &RecordedRequest) -> MockResponse {
    if req.uri.ends_with("/appid") {
        return MockResponse::json(serde_json::json!({ "APP_ID": APP_ID }));
    }
    if req.method == Method::POST && req.uri.starts_with("/v1/") {
        return MockResponse::json(serde_json::json!({ "TFS_FILE_NAME": "T1abc.png" }));
    }
    MockResponse::ok(Bytes::new())
}

type Handler = Arc<dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync>;

struct Shared {
    port: u16,
    budget: AtomicU32,
    listing_open: AtomicBool,
    listing_hits: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
    handler: Handler,
}

pub struct MockTfs {
    shared: Arc<Shared>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockTfs {
    /// Starts the mock on a random port. `/tfs.list` hands out this server
    /// with `budget` as the refresh budget.
    pub async fn start<F>(budget: u32, handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let shared = Arc::new(Shared {
            port,
            budget: AtomicU32::new(budget),
            listing_open: AtomicBool::new(true),
            listing_hits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            handler: Arc::new(handler),
        });

        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel();
        let server = Arc::clone(&shared);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let shared = Arc::clone(&server);

                                tokio::spawn(async move {
                                    let service = service_fn(move |req| {
                                        let shared = Arc::clone(&shared);
                                        async move { handle(shared, req).await }
                                    });

                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        eprintln!("Server error: {}", err);
                                    }
                                });
                            }
                            Err(err) => {
                                eprintln!("Accept error: {}", err);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });

        Self {
            shared,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn port(&self) -> u16 {
        self.shared.port
    }

    pub fn root(&self) -> String {
        format!("127.0.0.1:{}", self.shared.port)
    }

    /// Client config pointing at this mock, with fast bootstrap polling.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("tfscom")
            .with_root_server(self.root())
            .with_image_servers(vec![IMAGE_HOST.to_string()])
            .with_discovery_timeout(Duration::from_secs(1))
            .with_bootstrap_interval(Duration::from_millis(20))
            .with_upload_timeout(Duration::from_secs(5))
    }

    /// Storage requests received so far, discovery excluded.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn listing_hits(&self) -> usize {
        self.shared.listing_hits.load(Ordering::SeqCst)
    }

    /// Makes `/tfs.list` answer 503 until [`open_listing`](Self::open_listing).
    pub fn close_listing(&self) {
        self.shared.listing_open.store(false, Ordering::SeqCst);
    }

    pub fn open_listing(&self) {
        self.shared.listing_open.store(true, Ordering::SeqCst);
    }
}

impl Drop for MockTfs {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(
    shared: Arc<Shared>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let uri = req
        .uri()
        .path_and_query()
        .map(|p| p.to_string())
        .unwrap_or_default();
    let body = req.into_body().collect().await?.to_bytes();

    let response = if uri == "/tfs.list" {
        shared.listing_hits.fetch_add(1, Ordering::SeqCst);
        if shared.listing_open.load(Ordering::SeqCst) {
            let listing = format!(
                "{}\n127.0.0.1:{}",
                shared.budget.load(Ordering::SeqCst),
                shared.port
            );
            MockResponse::ok(listing)
        } else {
            MockResponse::status(503, "listing unavailable")
        }
    } else {
        let recorded = RecordedRequest { method, uri, body };
        let response = (shared.handler)(&recorded);
        shared.requests.lock().unwrap().push(recorded);
        response
    };

    Ok(Response::builder()
        .status(StatusCode::from_u16(response.status).unwrap())
        .body(Full::new(response.body))
        .unwrap())
}
