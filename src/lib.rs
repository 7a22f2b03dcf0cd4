//! caddy-hook - push webhook to in-place Caddy reload
//!
//! This library provides the pieces of a small automation bridge that:
//! - Verifies GitHub push deliveries signed with a shared secret
//! - Rewrites the asset revision pinned inside a Caddyfile
//! - Runs `caddy reload` inside the Caddy container through the Docker socket,
//!   without restarting the container

pub mod config;
pub mod error;
pub mod ingress;
pub mod orchestrator;
pub mod patcher;
pub mod runtime;
pub mod server;
