use caddy_hook::config::{Config, DEFAULT_SECRET};
use caddy_hook::ingress::WebhookIngress;
use caddy_hook::orchestrator::ReloadOrchestrator;
use caddy_hook::runtime::SocketRuntime;
use caddy_hook::server::{HookServer, PKG_NAME, VERSION};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("caddy_hook=debug".parse().expect("valid log directive")),
        )
        .init();

    // Optional TOML file as first argument; environment variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = match &config_path {
        Some(path) => Config::load(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to load configuration");
            e
        })?,
        None => Config::from_env().map_err(|e| {
            error!(error = %e, "Invalid configuration");
            e
        })?,
    };

    print_startup_banner(&config);

    if config.server.secret == DEFAULT_SECRET {
        warn!("Webhook secret is the built-in default; set GITHUB_SECRETKEY");
    }

    let listen_addr = config.server.listen_addr()?;

    let runtime = SocketRuntime::connect(&config.docker.socket, config.docker.timeout_secs).map_err(|e| {
        error!(socket = %config.docker.socket.display(), error = %e, "Failed to set up Docker client");
        e
    })?;
    let orchestrator = ReloadOrchestrator::new(&config, runtime);
    let ingress = WebhookIngress::new(config.server.secret.clone(), orchestrator);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HookServer::bind(listen_addr, &config.server.hook_path, ingress, shutdown_rx)
        .await
        .map_err(|e| {
            error!(addr = %listen_addr, error = %e, "Failed to start webhook server");
            e
        })?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Webhook server error");
        }
    });

    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);

    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT (Ctrl+C), shutting down...");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting webhook bridge");
    info!(
        listen = %config.server.listen,
        hook_path = %config.server.hook_path,
        tracked_ref = %config.server.tracked_ref,
        "Server configuration"
    );
    info!(
        caddyfile = %config.caddy.caddyfile.display(),
        container = %config.caddy.container,
        command = ?config.caddy.reload_command().argv(),
        "Caddy settings"
    );
    info!(
        socket = %config.docker.socket.display(),
        timeout_secs = config.docker.timeout_secs,
        "Docker settings"
    );
}
