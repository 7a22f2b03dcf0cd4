//! Webhook ingress
//!
//! Verifies GitHub webhook deliveries against the shared secret and hands push
//! events to a registered [`PushHandler`]. Nothing reaches the handler unless
//! the signature checks out.
//!
//! Both delivery content types GitHub offers are accepted: `application/json`
//! and `application/x-www-form-urlencoded`, where the JSON document travels in
//! the `payload` form field. The signature always covers the raw body.

use hmac::{Hmac, Mac};
use hyper::header::CONTENT_TYPE;
use hyper::HeaderMap;
use serde::Deserialize;
use sha2::Sha256;
use std::borrow::Cow;
use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

const SIGNATURE_PREFIX: &str = "sha256=";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const FORM_PAYLOAD_FIELD: &str = "payload=";

/// GitHub push event payload
#[derive(Debug, Clone, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub ref_name: String,
    /// Commit SHA the ref now points at
    pub after: String,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub pusher: Option<Pusher>,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub full_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pusher {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadCommit {
    pub message: String,
}

impl PushEvent {
    /// First line of the head commit message
    pub fn head_commit_title(&self) -> Option<&str> {
        self.head_commit
            .as_ref()
            .and_then(|c| c.message.lines().next())
    }
}

/// Metadata of one webhook delivery
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Value of `X-GitHub-Delivery`, when sent
    pub id: Option<String>,
    /// Value of `X-GitHub-Event`
    pub event: String,
}

/// Receives authenticated push events
pub trait PushHandler: Send + Sync {
    /// Returning an error marks the delivery as failed downstream
    fn on_push(
        &self,
        delivery: &Delivery,
        event: PushEvent,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// What the ingress did with an authenticated delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A push event was handed to the handler and it succeeded
    Handled,
    /// GitHub's hook setup ping
    Pong,
    /// Authenticated, but not an event type we act on
    Ignored(String),
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("missing X-Hub-Signature-256 header")]
    MissingSignature,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("missing X-GitHub-Event header")]
    MissingEventType,

    #[error("malformed push payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("malformed form delivery: {0}")]
    MalformedForm(String),

    #[error("push handler failed: {0:#}")]
    Handler(#[source] anyhow::Error),
}

/// Verifies and dispatches webhook deliveries
pub struct WebhookIngress<H> {
    secret: String,
    handler: H,
}

impl<H: PushHandler> WebhookIngress<H> {
    pub fn new(secret: impl Into<String>, handler: H) -> Self {
        Self {
            secret: secret.into(),
            handler,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Check a `sha256=<hex>` signature over the raw payload
    pub fn verify_signature(&self, payload: &[u8], signature: Option<&str>) -> Result<(), IngressError> {
        let signature = signature.ok_or(IngressError::MissingSignature)?;

        let provided = signature
            .strip_prefix(SIGNATURE_PREFIX)
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or_else(|| {
                warn!("Invalid GitHub signature format");
                IngressError::InvalidSignature
            })?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| IngressError::InvalidSignature)?;
        mac.update(payload);

        // verify_slice compares in constant time
        mac.verify_slice(&provided)
            .map_err(|_| IngressError::InvalidSignature)
    }

    /// Authenticate a delivery and dispatch it by event type
    pub async fn handle(&self, headers: &HeaderMap, payload: &[u8]) -> Result<Dispatch, IngressError> {
        self.verify_signature(payload, header_str(headers, SIGNATURE_HEADER))?;

        let event = header_str(headers, EVENT_HEADER).ok_or(IngressError::MissingEventType)?;
        let delivery = Delivery {
            id: header_str(headers, DELIVERY_HEADER).map(str::to_string),
            event: event.to_string(),
        };

        match event {
            "push" => {
                let document = json_document(headers, payload)?;
                let push: PushEvent =
                    serde_json::from_slice(&document).map_err(IngressError::MalformedPayload)?;

                debug!(
                    delivery = ?delivery.id,
                    git_ref = %push.ref_name,
                    commit = %push.after,
                    repo = ?push.repository.as_ref().map(|r| r.full_name.as_str()),
                    "Parsed GitHub push event"
                );

                self.handler
                    .on_push(&delivery, push)
                    .await
                    .map_err(IngressError::Handler)?;
                Ok(Dispatch::Handled)
            }
            "ping" => {
                info!(delivery = ?delivery.id, "Webhook ping received");
                Ok(Dispatch::Pong)
            }
            other => {
                debug!(delivery = ?delivery.id, event = other, "Ignoring webhook event");
                Ok(Dispatch::Ignored(other.to_string()))
            }
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// The JSON document carried by a delivery body
fn json_document<'a>(headers: &HeaderMap, body: &'a [u8]) -> Result<Cow<'a, [u8]>, IngressError> {
    let is_form = header_str(headers, CONTENT_TYPE.as_str())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE));
    if !is_form {
        return Ok(Cow::Borrowed(body));
    }

    let form = std::str::from_utf8(body).map_err(|e| IngressError::MalformedForm(e.to_string()))?;
    let field = form
        .split('&')
        .find_map(|pair| pair.strip_prefix(FORM_PAYLOAD_FIELD))
        .ok_or_else(|| IngressError::MalformedForm("no payload field".to_string()))?;

    // Form encoding writes spaces as '+'
    let spaced = field.replace('+', " ");
    let json = urlencoding::decode(&spaced)
        .map_err(|e| IngressError::MalformedForm(e.to_string()))?;
    Ok(Cow::Owned(json.into_owned().into_bytes()))
}

/// Compute the `X-Hub-Signature-256` value GitHub would send for `payload`
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}
