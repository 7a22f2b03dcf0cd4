//! Test helpers: a fake Docker daemon on a Unix socket and a raw HTTP client

#![allow(dead_code)]

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixListener};
use tokio::task::JoinHandle;

/// How the fake daemon answers
#[derive(Debug, Clone)]
pub struct DockerBehavior {
    pub containers: serde_json::Value,
    pub create_status: StatusCode,
    pub exec_id: String,
    pub start_status: StatusCode,
    /// Never answer, to exercise client timeouts
    pub hang: bool,
}

impl Default for DockerBehavior {
    fn default() -> Self {
        Self {
            containers: serde_json::json!([
                { "Id": "1111aaaa", "Names": ["/web"] },
                { "Id": "2222bbbb", "Names": ["/caddy"] }
            ]),
            create_status: StatusCode::CREATED,
            exec_id: "e8f2c1".to_string(),
            start_status: StatusCode::OK,
            hang: false,
        }
    }
}

/// One request as seen by the fake daemon
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: serde_json::Value,
}

pub struct MockDocker {
    pub socket: PathBuf,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl MockDocker {
    pub async fn start(behavior: DockerBehavior) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(behavior);

        let log = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let log = Arc::clone(&log);
                let behavior = Arc::clone(&behavior);
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let log = Arc::clone(&log);
                        let behavior = Arc::clone(&behavior);
                        async move { respond(req, behavior, log).await }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        Self {
            socket,
            requests,
            handle,
            _dir: dir,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }
}

impl Drop for MockDocker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(
    req: Request<Incoming>,
    behavior: Arc<DockerBehavior>,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = unversioned(req.uri().path());
    let body = req
        .into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();

    log.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        path: path.clone(),
        body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
    });

    if behavior.hang {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }

    let (status, body) = if method == Method::GET && path == "/containers/json" {
        (StatusCode::OK, behavior.containers.to_string())
    } else if method == Method::POST && path.starts_with("/containers/") && path.ends_with("/exec") {
        if behavior.create_status.is_success() {
            (
                behavior.create_status,
                serde_json::json!({ "Id": behavior.exec_id }).to_string(),
            )
        } else {
            (
                behavior.create_status,
                r#"{"message":"OCI runtime exec failed"}"#.to_string(),
            )
        }
    } else if method == Method::POST && path.starts_with("/exec/") && path.ends_with("/start") {
        (behavior.start_status, String::new())
    } else {
        (StatusCode::NOT_FOUND, r#"{"message":"page not found"}"#.to_string())
    };

    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap())
}

/// Strip the `/v1.47`-style API version prefix the Docker client adds
pub fn unversioned(path: &str) -> String {
    match path.strip_prefix("/v").and_then(|rest| rest.split_once('/')) {
        Some((version, rest))
            if !version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.') =>
        {
            format!("/{}", rest)
        }
        _ => path.to_string(),
    }
}

/// Send a raw HTTP/1.1 request and return status code and body
pub async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    headers: &[(&str, String)],
    body: &[u8],
) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n",
        method,
        path,
        body.len()
    );
    for (name, value) in headers {
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8_lossy(&raw).to_string();

    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();

    (status, body)
}
