//! Caddyfile revision pin rewriting
//!
//! Asset manifests are referenced through paths that embed the commit they were
//! built from, e.g. `@<sha>/10.11/manifest.json`. On every push the embedded
//! commit is swapped for the new one; everything around it is left untouched.

use regex::{Captures, Regex};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Length of a full commit SHA-1 in hex
pub const REVISION_LEN: usize = 40;

/// `@<sha>/10.11/manifest.json`
const FIXED_VERSION_PIN: &str = r"(@)[a-fA-F0-9]{40}(/10\.11/manifest\.json)";

/// `@<sha>/{http.regexp.VER.1}/manifest.json`
const PLACEHOLDER_VERSION_PIN: &str =
    r"(@)[a-fA-F0-9]{40}(/\{http\.regexp\.VER\.1\}/manifest\.json)";

fn pin_rules() -> &'static [Regex; 2] {
    static RULES: OnceLock<[Regex; 2]> = OnceLock::new();
    RULES.get_or_init(|| {
        [
            Regex::new(FIXED_VERSION_PIN).expect("valid fixed version pattern"),
            Regex::new(PLACEHOLDER_VERSION_PIN).expect("valid placeholder version pattern"),
        ]
    })
}

/// Whether `s` looks like a full commit SHA (either hex case)
pub fn is_revision(s: &str) -> bool {
    s.len() == REVISION_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Rewrite every version pin in `content` to `revision`.
///
/// Returns the new content and the number of pins rewritten. Pins already at
/// `revision` count as rewritten.
pub fn patch_content(content: &str, revision: &str) -> (String, usize) {
    let mut replaced = 0;
    let mut updated = content.to_string();

    for rule in pin_rules() {
        updated = rule
            .replace_all(&updated, |caps: &Captures| {
                replaced += 1;
                format!("{}{}{}", &caps[1], revision, &caps[2])
            })
            .into_owned();
    }

    (updated, replaced)
}

/// Rewrites version pins in a Caddyfile on disk
#[derive(Debug, Clone)]
pub struct ConfigPatcher {
    path: PathBuf,
}

impl ConfigPatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, rewrite all pins to `revision` and write it back.
    ///
    /// The write is a plain overwrite with mode 0644; a crash mid-write can
    /// leave a truncated file.
    pub async fn update_config(&self, revision: &str) -> io::Result<usize> {
        if !is_revision(revision) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("'{}' is not a {}-character hex revision", revision, REVISION_LEN),
            ));
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let (updated, replaced) = patch_content(&content, revision);

        write_file(&self.path, updated.as_bytes()).await?;

        debug!(path = %self.path.display(), replaced, "Caddyfile rewritten");
        Ok(replaced)
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o644);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.flush().await?;
    Ok(())
}
