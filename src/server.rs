use crate::error::{json_error_response, HookErrorCode};
use crate::ingress::{Dispatch, IngressError, PushHandler, WebhookIngress};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// GitHub caps webhook payloads at 25 MB
pub const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// HTTP listener serving the webhook endpoint
pub struct HookServer<H> {
    listener: TcpListener,
    hook_path: Arc<str>,
    ingress: Arc<WebhookIngress<H>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<H: PushHandler + 'static> HookServer<H> {
    /// Bind the listening socket. Failing here is fatal for the process.
    pub async fn bind(
        bind_addr: SocketAddr,
        hook_path: &str,
        ingress: WebhookIngress<H>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind webhook listener on {}: {}", bind_addr, e))?;

        Ok(Self {
            listener,
            hook_path: Arc::from(hook_path),
            ingress: Arc::new(ingress),
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(addr = %addr, path = %self.hook_path, "Webhook server listening (HTTP/1.1 and HTTP/2)");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let ingress = Arc::clone(&self.ingress);
                            let hook_path = Arc::clone(&self.hook_path);

                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, ingress, hook_path).await {
                                    debug!(addr = %addr, error = %e, "Webhook connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept webhook connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means shutdown
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Webhook server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<H: PushHandler + 'static>(
    stream: TcpStream,
    ingress: Arc<WebhookIngress<H>>,
    hook_path: Arc<str>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let ingress = Arc::clone(&ingress);
        let hook_path = Arc::clone(&hook_path);
        async move { handle_request(req, ingress, hook_path).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Webhook connection error: {}", e))?;

    Ok(())
}

async fn handle_request<H: PushHandler>(
    req: Request<Incoming>,
    ingress: Arc<WebhookIngress<H>>,
    hook_path: Arc<str>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "Webhook server request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        (&Method::POST, p) if p == &*hook_path => handle_hook(req, &ingress).await,

        (_, p) if p == &*hook_path => {
            json_error_response(HookErrorCode::MethodNotAllowed, "webhooks must be POSTed")
        }

        _ => json_error_response(HookErrorCode::NotFound, "not found"),
    };

    Ok(response)
}

async fn handle_hook<H: PushHandler>(
    req: Request<Incoming>,
    ingress: &WebhookIngress<H>,
) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();

    let payload = match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(limit = MAX_BODY_BYTES, "Webhook payload too large");
            return json_error_response(HookErrorCode::PayloadTooLarge, e.to_string());
        }
        Err(e) => {
            warn!(error = %e, "Failed to read webhook body");
            return json_error_response(HookErrorCode::BodyReadFailed, e.to_string());
        }
    };

    match ingress.handle(&parts.headers, &payload).await {
        Ok(dispatch) => {
            let result = match dispatch {
                Dispatch::Handled => "handled".to_string(),
                Dispatch::Pong => "pong".to_string(),
                Dispatch::Ignored(event) => format!("ignored {}", event),
            };
            json_response(
                StatusCode::OK,
                serde_json::json!({ "result": result }).to_string(),
            )
        }
        // Authenticated deliveries are acknowledged even when the reload
        // fails; the failure is ours to log, not the sender's to retry.
        Err(IngressError::Handler(e)) => {
            error!(error = %format!("{:#}", e), "Webhook event handling failed");
            json_response(
                StatusCode::OK,
                serde_json::json!({ "result": "failed", "error": format!("{:#}", e) }).to_string(),
            )
        }
        Err(e) => {
            warn!(error = %e, "Rejected webhook delivery");
            let code = HookErrorCode::for_ingress(&e).unwrap_or(HookErrorCode::MalformedPayload);
            json_error_response(code, e.to_string())
        }
    }
}
