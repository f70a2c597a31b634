// HTTP tests against a local server
//
// A raw tokio TcpListener answers a handful of fixed routes; the runner is
// driven from a blocking task because its API waits on the confined thread.

use hostjs_common::{cache_key, HostjsError, ResolutionError, RunnerConfig};
use hostjs_runtime::modules::{Fetcher, ReqwestFetcher};
use hostjs_runtime::CodeRunner;
use serde_json::json;
use std::net::SocketAddr;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn route(path: &str) -> (u16, &'static str) {
    match path {
        "/lib.js" => (200, "module.exports = { answer: 42 };"),
        "/data.json" => (200, "{\"ok\":true,\"items\":[1,2]}"),
        _ => (404, "not found"),
    }
}

async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = String::from_utf8_lossy(&request);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = route(&path);
                let reason = if status == 200 { "OK" } else { "Not Found" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reqwest_fetcher_maps_status_codes() {
    let addr = serve().await;
    let fetcher = ReqwestFetcher::new();

    let body = fetcher.fetch(&format!("http://{}/lib.js", addr)).await.unwrap();
    assert_eq!(body, b"module.exports = { answer: 42 };");

    let missing = format!("http://{}/missing.js", addr);
    match fetcher.fetch(&missing).await {
        Err(ResolutionError::HttpStatus { url, status }) => {
            assert_eq!(url, missing);
            assert_eq!(status, 404);
        }
        other => panic!("expected HTTP status error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_url_modules_and_http_client_through_the_runner() {
    let addr = serve().await;
    let project = TempDir::new().unwrap();
    let caches = TempDir::new().unwrap();
    let config = RunnerConfig::new(project.path(), caches.path());
    let lib_url = format!("http://{}/lib.js", addr);
    let data_url = format!("http://{}/data.json", addr);
    let missing_url = format!("http://{}/missing.js", addr);

    let (module, data, missing, cached) = tokio::task::spawn_blocking({
        let lib_url = lib_url.clone();
        let missing_url = missing_url.clone();
        move || {
            let runner = CodeRunner::builder(config).build().unwrap();
            let module = runner
                .run_source(format!("require('{}').answer", lib_url))
                .unwrap();
            let data = runner
                .run_source(format!("require('sdk/http/client').getJson('{}')", data_url))
                .unwrap();
            let missing = runner.run_source(format!("require('{}')", missing_url));
            let cached = runner
                .config()
                .dependencies_cache_dir()
                .join(cache_key::encode_locator(&lib_url));
            runner.close().unwrap();
            (module, data, missing, cached)
        }
    })
    .await
    .unwrap();

    assert_eq!(module, json!(42));
    assert_eq!(data, json!({"ok": true, "items": [1, 2]}));
    assert_eq!(
        std::fs::read_to_string(cached).unwrap(),
        "module.exports = { answer: 42 };"
    );
    match missing {
        Err(HostjsError::Resolution(ResolutionError::HttpStatus { url, status })) => {
            assert_eq!(url, missing_url);
            assert_eq!(status, 404);
        }
        other => panic!("expected HTTP status error, got {:?}", other),
    }
}
