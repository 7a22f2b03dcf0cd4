use crate::runtime::{ReloadCommand, DEFAULT_TIMEOUT_SECS};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Global configuration, built once at startup and never mutated afterwards
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Webhook listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// The Caddy instance being managed
    #[serde(default)]
    pub caddy: CaddyConfig,

    /// Docker Engine API access
    #[serde(default)]
    pub docker: DockerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080)
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path the webhook is delivered to (default: /hook)
    #[serde(default = "default_hook_path")]
    pub hook_path: String,

    /// Shared secret used to verify delivery signatures
    #[serde(default = "default_secret")]
    pub secret: String,

    /// Only pushes to this ref trigger a reload (compared case-insensitively)
    #[serde(default = "default_tracked_ref")]
    pub tracked_ref: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaddyConfig {
    /// Path of the Caddyfile, as seen by this process and by the container
    #[serde(default = "default_caddyfile")]
    pub caddyfile: PathBuf,

    /// Container NAME (not id) running Caddy
    #[serde(default = "default_container")]
    pub container: String,

    /// Binary invoked inside the container
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Config adapter passed to `caddy reload --adapter`
    #[serde(default = "default_adapter")]
    pub adapter: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DockerConfig {
    /// Unix socket of the Docker daemon
    #[serde(default = "default_docker_socket")]
    pub socket: PathBuf,

    /// Per-call timeout for Docker API requests in seconds (default: 10)
    #[serde(default = "default_docker_timeout")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            hook_path: default_hook_path(),
            secret: default_secret(),
            tracked_ref: default_tracked_ref(),
        }
    }
}

impl Default for CaddyConfig {
    fn default() -> Self {
        Self {
            caddyfile: default_caddyfile(),
            container: default_container(),
            binary: default_binary(),
            adapter: default_adapter(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: default_docker_socket(),
            timeout_secs: default_docker_timeout(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_hook_path() -> String {
    "/hook".to_string()
}

/// Matches the historical default; main warns when it is still in use
pub const DEFAULT_SECRET: &str = "secret";

fn default_secret() -> String {
    DEFAULT_SECRET.to_string()
}

fn default_tracked_ref() -> String {
    "refs/heads/main".to_string()
}

fn default_caddyfile() -> PathBuf {
    PathBuf::from("/etc/caddy/Caddyfile")
}

fn default_container() -> String {
    "caddy".to_string()
}

fn default_binary() -> String {
    "caddy".to_string()
}

fn default_adapter() -> String {
    "caddyfile".to_string()
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_docker_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl ServerConfig {
    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {}", self.listen, e))
    }
}

impl CaddyConfig {
    /// The argv of the reload command run inside the container
    pub fn reload_command(&self) -> ReloadCommand {
        ReloadCommand {
            binary: self.binary.clone(),
            config_path: self.caddyfile.to_string_lossy().into_owned(),
            adapter: self.adapter.clone(),
        }
    }
}

impl Config {
    /// Load a TOML file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Build from defaults and environment variables only
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from an environment-like lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("LISTEN_ADDR") {
            self.server.listen = v;
        }
        if let Some(v) = get("HOOK_PATH") {
            self.server.hook_path = v;
        }
        if let Some(v) = get("GITHUB_SECRETKEY") {
            self.server.secret = v;
        }
        if let Some(v) = get("TRACKED_REF") {
            self.server.tracked_ref = v;
        }
        if let Some(v) = get("CADDYFILE_PATH") {
            self.caddy.caddyfile = PathBuf::from(v);
        }
        if let Some(v) = get("CADDY_CONTAINER") {
            self.caddy.container = v;
        }
        if let Some(v) = get("CADDY_BINARY") {
            self.caddy.binary = v;
        }
        if let Some(v) = get("CADDY_ADAPTER") {
            self.caddy.adapter = v;
        }
        if let Some(v) = get("DOCKER_SOCK") {
            self.docker.socket = PathBuf::from(v);
        }
        if let Some(v) = get("DOCKER_TIMEOUT_SECS") {
            self.docker.timeout_secs = v
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid DOCKER_TIMEOUT_SECS '{}': {}", v, e))?;
        }

        Ok(())
    }

    /// Validate all configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.server.listen_addr() {
            errors.push(e.to_string());
        }
        if !self.server.hook_path.starts_with('/') {
            errors.push(format!(
                "hook_path must start with '/', got '{}'",
                self.server.hook_path
            ));
        }
        if self.server.secret.is_empty() {
            errors.push("webhook secret must not be empty".to_string());
        }
        if self.server.tracked_ref.is_empty() {
            errors.push("tracked_ref must not be empty".to_string());
        }
        if self.caddy.container.is_empty() {
            errors.push("container name must not be empty".to_string());
        }
        if self.caddy.binary.is_empty() {
            errors.push("caddy binary must not be empty".to_string());
        }
        if self.caddy.caddyfile.as_os_str().is_empty() {
            errors.push("caddyfile path must not be empty".to_string());
        }
        if self.docker.socket.as_os_str().is_empty() {
            errors.push("docker socket path must not be empty".to_string());
        }
        if self.docker.timeout_secs == 0 {
            errors.push("docker timeout_secs must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            anyhow::bail!("Configuration errors:\n  - {}", errors.join("\n  - "));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.hook_path, "/hook");
        assert_eq!(config.server.secret, "secret");
        assert_eq!(config.server.tracked_ref, "refs/heads/main");
        assert_eq!(config.caddy.caddyfile, PathBuf::from("/etc/caddy/Caddyfile"));
        assert_eq!(config.caddy.container, "caddy");
        assert_eq!(config.docker.socket, PathBuf::from("/var/run/docker.sock"));
        assert_eq!(config.docker.timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9000"
secret = "s3cr3t"

[caddy]
caddyfile = "/srv/Caddyfile"
container = "edge"

[docker]
timeout_secs = 3
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.secret, "s3cr3t");
        assert_eq!(config.server.hook_path, "/hook");
        assert_eq!(config.caddy.caddyfile, PathBuf::from("/srv/Caddyfile"));
        assert_eq!(config.caddy.container, "edge");
        assert_eq!(config.caddy.adapter, "caddyfile");
        assert_eq!(config.docker.timeout_secs, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(lookup(&[
                ("CADDYFILE_PATH", "/tmp/Caddyfile"),
                ("CADDY_CONTAINER", "proxy"),
                ("DOCKER_SOCK", "/run/docker.sock"),
                ("GITHUB_SECRETKEY", "hunter2"),
                ("DOCKER_TIMEOUT_SECS", "4"),
                ("HOOK_PATH", ""),
            ]))
            .unwrap();

        assert_eq!(config.caddy.caddyfile, PathBuf::from("/tmp/Caddyfile"));
        assert_eq!(config.caddy.container, "proxy");
        assert_eq!(config.docker.socket, PathBuf::from("/run/docker.sock"));
        assert_eq!(config.server.secret, "hunter2");
        assert_eq!(config.docker.timeout_secs, 4);
        // Empty values keep the default
        assert_eq!(config.server.hook_path, "/hook");
    }

    #[test]
    fn test_env_invalid_timeout() {
        let mut config = Config::default();
        let err = config
            .apply_env(lookup(&[("DOCKER_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("DOCKER_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = Config::default();
        config.server.listen = "not an address".to_string();
        config.server.hook_path = "hook".to_string();
        config.docker.timeout_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Invalid listen address"));
        assert!(err.contains("hook_path"));
        assert!(err.contains("timeout_secs"));
    }

    #[test]
    fn test_reload_command() {
        let mut config = Config::default();
        config.caddy.caddyfile = PathBuf::from("/etc/caddy/Caddyfile");
        let cmd = config.caddy.reload_command();
        assert_eq!(
            cmd.argv(),
            vec![
                "caddy",
                "reload",
                "--config",
                "/etc/caddy/Caddyfile",
                "--adapter",
                "caddyfile"
            ]
        );
    }
}
