//! Push event -> Caddyfile patch -> Caddy reload

use crate::config::Config;
use crate::ingress::{Delivery, PushEvent, PushHandler};
use crate::patcher::ConfigPatcher;
use crate::runtime::{reload_service, ContainerRuntime, ReloadCommand, RuntimeError};
use anyhow::Context;
use tracing::{error, info};

/// Why a push did not lead to a reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The push was for a ref other than the tracked one
    UntrackedRef(String),
    /// The tracked ref was deleted
    Deleted,
}

/// Terminal state of a successfully processed push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadOutcome {
    Skipped(SkipReason),
    /// The reload was started; `patched` tells whether the Caddyfile write succeeded
    Completed { patched: bool, replaced: usize },
}

/// Reacts to pushes on the tracked ref by patching and reloading Caddy.
///
/// Holds no per-event state; concurrent deliveries race on the Caddyfile and
/// the last writer wins.
pub struct ReloadOrchestrator<R> {
    tracked_ref: String,
    container: String,
    command: ReloadCommand,
    patcher: ConfigPatcher,
    runtime: R,
}

impl<R: ContainerRuntime> ReloadOrchestrator<R> {
    pub fn new(config: &Config, runtime: R) -> Self {
        Self {
            tracked_ref: config.server.tracked_ref.clone(),
            container: config.caddy.container.clone(),
            command: config.caddy.reload_command(),
            patcher: ConfigPatcher::new(config.caddy.caddyfile.clone()),
            runtime,
        }
    }

    #[cfg(test)]
    fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Ref comparison is case-insensitive
    pub fn is_tracked(&self, git_ref: &str) -> bool {
        git_ref.eq_ignore_ascii_case(&self.tracked_ref)
    }

    /// Run the patch-then-reload sequence for one push.
    ///
    /// A failed patch is logged and the reload is still attempted; only a
    /// failed reload is returned as an error.
    pub async fn process(&self, event: &PushEvent) -> Result<ReloadOutcome, RuntimeError> {
        if !self.is_tracked(&event.ref_name) {
            info!(git_ref = %event.ref_name, "Push event is not for the tracked branch");
            return Ok(ReloadOutcome::Skipped(SkipReason::UntrackedRef(
                event.ref_name.clone(),
            )));
        }

        if event.deleted {
            info!(git_ref = %event.ref_name, "Tracked branch was deleted, nothing to reload");
            return Ok(ReloadOutcome::Skipped(SkipReason::Deleted));
        }

        info!(
            commit = %event.after,
            previous = ?event.before,
            pusher = ?event.pusher.as_ref().map(|p| p.name.as_str()),
            title = ?event.head_commit_title(),
            "Push received"
        );

        let (patched, replaced) = match self.patcher.update_config(&event.after).await {
            Ok(replaced) => {
                info!(
                    path = %self.patcher.path().display(),
                    replaced,
                    "Caddyfile updated successfully"
                );
                (true, replaced)
            }
            Err(e) => {
                error!(
                    path = %self.patcher.path().display(),
                    error = %e,
                    "Failed to update Caddyfile"
                );
                (false, 0)
            }
        };

        reload_service(&self.runtime, &self.container, &self.command).await?;

        Ok(ReloadOutcome::Completed { patched, replaced })
    }
}

impl<R: ContainerRuntime> PushHandler for ReloadOrchestrator<R> {
    async fn on_push(&self, delivery: &Delivery, event: PushEvent) -> anyhow::Result<()> {
        let outcome = self
            .process(&event)
            .await
            .with_context(|| format!("reload {} in container {:?}", self.command.binary, self.container))?;

        info!(delivery = ?delivery.id, outcome = ?outcome, "Push event processed");
        Ok(())
    }
}
