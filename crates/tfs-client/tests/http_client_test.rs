//! TFS Client Integration Tests
//!
//! Every test runs a real [`TfsClient`] against an in-process hyper server
//! that serves the agent list and plays the storage agent. They cover:
//! - Bootstrap: discovery, application id lookup, queued requests
//! - Anonymous objects: upload, remove, download, metadata
//! - Named files: create, write, remove
//! - Error classification and refresh budget handling

mod support;

use std::time::Duration;

use hyper::Method;
use serde_json::json;
use support::{default_routes, MockResponse, MockTfs, APP_ID, IMAGE_HOST};
use tfs_client::{ByteRange, ClientEvent, ClientState, TfsClient, TfsError};

const WAIT: Duration = Duration::from_secs(5);

async fn ready_client(mock: &MockTfs) -> TfsClient {
    let client = TfsClient::new(mock.config()).await.unwrap();
    tokio::time::timeout(WAIT, client.wait_ready())
        .await
        .expect("client did not become ready")
        .unwrap();
    client
}

/// Storage requests other than the bootstrap `/appid` lookup.
fn storage_requests(mock: &MockTfs) -> Vec<support::RecordedRequest> {
    mock.requests()
        .into_iter()
        .filter(|r| !r.uri.ends_with("/appid"))
        .collect()
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test]
async fn test_bootstrap_publishes_servers_then_ready() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = TfsClient::new(mock.config()).await.unwrap();
    let mut events = client.subscribe();

    let first = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    match first {
        ClientEvent::ServersUpdated(servers) => {
            assert_eq!(servers.len(), 1);
            assert_eq!(servers[0].port(), mock.port());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let second = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert!(matches!(second, ClientEvent::Ready));

    assert_eq!(client.state().await, ClientState::Ready);
    assert_eq!(client.appid(), Some(APP_ID));
    assert_eq!(client.servers().await.len(), 1);
}

#[tokio::test]
async fn test_preset_appid_skips_lookup() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = TfsClient::new(mock.config().with_appid("77")).await.unwrap();
    tokio::time::timeout(WAIT, client.wait_ready()).await.unwrap().unwrap();

    assert_eq!(client.appid(), Some("77"));
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_requests_queue_until_servers_arrive() {
    let mock = MockTfs::start(100, default_routes).await;
    mock.close_listing();

    let client = TfsClient::new(mock.config()).await.unwrap();
    let mut pending = Vec::new();
    for i in 0..3 {
        let client = client.clone();
        pending.push(tokio::spawn(async move {
            client.remove(&format!("T1n{}.png", i), None, None).await
        }));
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(client.state().await, ClientState::Bootstrapping);
    assert!(mock.requests().is_empty());
    assert!(mock.listing_hits() > 0);

    mock.open_listing();
    for handle in pending {
        tokio::time::timeout(WAIT, handle).await.unwrap().unwrap().unwrap();
    }

    assert_eq!(client.state().await, ClientState::Ready);
    let mut uris: Vec<String> = storage_requests(&mock).into_iter().map(|r| r.uri).collect();
    uris.sort();
    assert_eq!(
        uris,
        vec!["/v1/tfscom/T1n0.png", "/v1/tfscom/T1n1.png", "/v1/tfscom/T1n2.png"]
    );
}

#[tokio::test]
async fn test_failed_appid_lookup_keeps_bootstrapping() {
    let mock = MockTfs::start(100, |req| {
        if req.uri.ends_with("/appid") {
            MockResponse::status(500, "appkey unknown")
        } else {
            default_routes(req)
        }
    })
    .await;

    let client = TfsClient::new(mock.config()).await.unwrap();
    let mut events = client.subscribe();

    let error = loop {
        match tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            ClientEvent::Error(err) => break err,
            ClientEvent::Ready => panic!("client must not become ready"),
            _ => continue,
        }
    };
    assert_eq!(error.status(), Some(500));

    assert_eq!(client.state().await, ClientState::Bootstrapping);
    assert_eq!(client.appid(), None);
    let recorded = client.bootstrap_error().await.unwrap();
    assert_eq!(recorded.status(), Some(500));

    let err = client.wait_ready().await.unwrap_err();
    assert!(matches!(err, TfsError::Bootstrap(_)));
}

// ============================================================================
// Anonymous Objects
// ============================================================================

#[tokio::test]
async fn test_upload_returns_name_and_url() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = ready_client(&mock).await;

    let info = client.upload("logo.png", b"png bytes".to_vec(), None).await.unwrap();

    assert_eq!(info.name, "T1abc.png");
    assert_eq!(info.size, 9);
    assert_eq!(info.url, format!("http://{}/tfscom/T1abc.png", IMAGE_HOST));

    let requests = storage_requests(&mock);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].uri, "/v1/tfscom?suffix=.png&simple_name=1");
    assert_eq!(&requests[0].body[..], b"png bytes");
}

#[tokio::test]
async fn test_upload_without_file_name_is_parse_error() {
    let mock = MockTfs::start(100, |req| {
        if req.method == Method::POST {
            MockResponse::json(json!({ "STATUS": "ok" }))
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    let err = client.upload("a.txt", b"x".to_vec(), None).await.unwrap_err();
    assert!(err.is_parse(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_remove_missing_object_succeeds() {
    let mock = MockTfs::start(100, |req| {
        if req.method == Method::DELETE {
            MockResponse::status(404, "no such file")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    client.remove("T1gone.png", None, None).await.unwrap();
    client.remove("T1gone.png", Some(1), None).await.unwrap();

    let uris: Vec<String> = storage_requests(&mock).into_iter().map(|r| r.uri).collect();
    assert_eq!(uris, vec!["/v1/tfscom/T1gone.png", "/v1/tfscom/T1gone.png?hide=1"]);
}

#[tokio::test]
async fn test_server_error_carries_status_and_body() {
    let mock = MockTfs::start(100, |req| {
        if req.method == Method::DELETE {
            MockResponse::status(500, "boom")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    let err = client.remove("T1abc.png", None, None).await.unwrap_err();
    match err {
        TfsError::Request {
            status, url, body, ..
        } => {
            assert_eq!(status, 500);
            assert_eq!(url, format!("127.0.0.1:{}/v1/tfscom/T1abc.png", mock.port()));
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_download_streams_range_into_sink() {
    let mock = MockTfs::start(100, |req| {
        if req.method == Method::GET && req.uri.starts_with("/v1/") {
            MockResponse::ok("llo")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    let mut sink: Vec<u8> = Vec::new();
    let range = ByteRange {
        offset: 2,
        size: Some(3),
    };
    let written = client
        .download("T1abc.txt", &mut sink, Some(range), None)
        .await
        .unwrap();

    assert_eq!(written, 3);
    assert_eq!(sink, b"llo");
    assert_eq!(storage_requests(&mock)[0].uri, "/v1/tfscom/T1abc.txt?offset=2&size=3");
}

#[tokio::test]
async fn test_download_missing_object_is_request_error() {
    let mock = MockTfs::start(100, |req| {
        if req.method == Method::GET && req.uri.starts_with("/v1/") {
            MockResponse::status(404, "not found")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    let mut sink: Vec<u8> = Vec::new();
    let err = client.download("T1gone.png", &mut sink, None, None).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_get_meta() {
    let mock = MockTfs::start(100, |req| {
        if req.uri.starts_with("/v1/tfscom/T1meta.png") {
            MockResponse::json(json!({
                "FILE_NAME": "T1meta.png",
                "BLOCK_ID": 1,
                "FILE_ID": 2,
                "OFFSET": 0,
                "SIZE": 2048,
                "OCCUPY_SIZE": 2072,
                "MODIFY_TIME": "2013-03-01 10:00:00",
                "CREATE_TIME": "2013-03-01 10:00:00",
                "STATUS": 0,
                "CRC": 3735928559u64
            }))
        } else if req.uri.starts_with("/v1/tfscom/T1bad.png") {
            MockResponse::ok("<html>oops</html>")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    let meta = client.get_meta("T1meta.png", Some(1), None).await.unwrap();
    assert_eq!(meta.file_name, "T1meta.png");
    assert_eq!(meta.size, 2048);
    assert_eq!(meta.crc, 3735928559);
    assert_eq!(storage_requests(&mock)[0].uri, "/v1/tfscom/T1meta.png?type=1");

    let err = client.get_meta("T1bad.png", None, None).await.unwrap_err();
    assert!(err.is_parse(), "unexpected error: {err:?}");
}

// ============================================================================
// Named Files
// ============================================================================

#[tokio::test]
async fn test_create_existing_file_succeeds() {
    let mock = MockTfs::start(100, |req| {
        if req.uri.contains("/file/") {
            MockResponse::status(409, "exists")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    client.create_file("320", "a/b.txt", None).await.unwrap();

    let requests = storage_requests(&mock);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].uri, "/v2/tfscom/8/320/file/a/b.txt?recursive=1");
}

#[tokio::test]
async fn test_upload_file_creates_then_writes() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = ready_client(&mock).await;

    let info = client
        .upload_file("320", "/docs/readme.txt", b"hello".to_vec(), Some(0), None)
        .await
        .unwrap();

    assert_eq!(info.name, "L1/8/320/docs/readme.txt");
    assert_eq!(info.size, 5);
    assert_eq!(info.url, format!("http://{}/L1/8/320/docs/readme.txt", IMAGE_HOST));

    let requests = storage_requests(&mock);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].uri, "/v2/tfscom/8/320/file/docs/readme.txt?recursive=1");
    assert_eq!(requests[1].method, Method::PUT);
    assert_eq!(requests[1].uri, "/v2/tfscom/8/320/file/docs/readme.txt");
    assert_eq!(&requests[1].body[..], b"hello");
}

#[tokio::test]
async fn test_upload_file_at_offset() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = ready_client(&mock).await;

    client
        .upload_file("320", "log.txt", b"world".to_vec(), Some(5), None)
        .await
        .unwrap();

    let requests = storage_requests(&mock);
    assert_eq!(requests[1].method, Method::PUT);
    assert_eq!(requests[1].uri, "/v2/tfscom/8/320/file/log.txt?offset=5&size=5");
}

#[tokio::test]
async fn test_unsendable_name_fails_before_dispatch() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = ready_client(&mock).await;

    for name in ["a<b>.png", "a|b\"c.png", "文件.png"] {
        let err = client.remove(name, None, None).await.unwrap_err();
        assert!(matches!(err, TfsError::InvalidArgument(_)), "{}: {:?}", name, err);
    }
    let err = client
        .upload_file("320", "a>b.txt", b"x".to_vec(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TfsError::InvalidArgument(_)));

    assert!(storage_requests(&mock).is_empty());
}

#[tokio::test]
async fn test_remove_file() {
    let mock = MockTfs::start(100, |req| {
        if req.method == Method::DELETE {
            MockResponse::status(404, "")
        } else {
            default_routes(req)
        }
    })
    .await;
    let client = ready_client(&mock).await;

    client.remove_file("320", "a.txt", None).await.unwrap();
    assert_eq!(storage_requests(&mock)[0].uri, "/v2/tfscom/8/320/file/a.txt");
}

#[tokio::test]
async fn test_get_appid_on_demand() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = ready_client(&mock).await;

    assert_eq!(client.get_appid(None).await.unwrap(), APP_ID);
}

// ============================================================================
// Refresh Budget
// ============================================================================

#[tokio::test]
async fn test_exhausted_budget_triggers_refresh() {
    let mock = MockTfs::start(2, default_routes).await;
    let client = TfsClient::new(mock.config().with_appid(APP_ID)).await.unwrap();
    tokio::time::timeout(WAIT, client.wait_ready()).await.unwrap().unwrap();

    let before = mock.listing_hits();
    client.remove("T1a.png", None, None).await.unwrap();
    client.remove("T1b.png", None, None).await.unwrap();

    tokio::time::timeout(WAIT, async {
        while mock.listing_hits() == before {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("budget exhaustion should refresh the server list");
}

#[tokio::test]
async fn test_manual_refresh() {
    let mock = MockTfs::start(100, default_routes).await;
    let client = ready_client(&mock).await;

    let before = mock.listing_hits();
    let outcome = client.refresh_servers().await;
    assert!(matches!(outcome, tfs_client::RefreshOutcome::Updated(ref s) if s.len() == 1));
    assert_eq!(mock.listing_hits(), before + 1);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_uploads() {
    let mock = MockTfs::start(1000, default_routes).await;
    let client = ready_client(&mock).await;

    let uploads = (0..20).map(|i| {
        let client = client.clone();
        async move {
            client
                .upload(&format!("f{}.jpg", i), vec![b'x'; 64], None)
                .await
        }
    });
    let results = futures::future::join_all(uploads).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(storage_requests(&mock).len(), 20);
}
