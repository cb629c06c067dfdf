//! Config check and handoff to the proxy-control collaborator
//!
//! Every candidate document is written to a uniquely named file in the
//! controller's config directory and checked with `haproxy -c -f` before a
//! reload is signalled. Rejected candidates stay on disk for diagnosis.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::error::PorttiError;

/// Reload request handed to the proxy-control collaborator together with the
/// validated configuration path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reload {
    pub path: PathBuf,
}

/// Outcome of one publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The document passed the check and a reload was signalled.
    Reloaded(PathBuf),
    /// Byte-identical to the last published document; nothing to do.
    Unchanged,
}

/// The reconciler publishes each generation through this seam; production
/// uses [`HaproxyPublisher`], tests record documents instead.
#[allow(async_fn_in_trait)]
pub trait ConfigPublisher {
    async fn publish(&mut self, document: &str) -> Result<PublishOutcome, PorttiError>;
}

/// Runs the HAProxy binary in check mode against a candidate file.
#[derive(Debug, Clone)]
pub struct Validator {
    bin: String,
    timeout: Duration,
    dir: PathBuf,
}

impl Validator {
    pub fn new(bin: &str, timeout: Duration, dir: &Path) -> Self {
        Self {
            bin: bin.to_string(),
            timeout,
            dir: dir.to_path_buf(),
        }
    }

    /// Write the document to a fresh file and check it. Returns the file path
    /// on success; on failure the file is kept for diagnosis.
    pub async fn check(&self, document: &str) -> Result<PathBuf, PorttiError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("haproxy-")
            .suffix(".cfg")
            .tempfile_in(&self.dir)?;
        file.write_all(document.as_bytes())?;
        file.flush()?;
        let (_file, path) = file.keep().map_err(|e| PorttiError::Io(e.error))?;

        debug!("checking candidate configuration {}", path.display());
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(&self.bin)
                .arg("-c")
                .arg("-f")
                .arg(&path)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Err(_) => Err(PorttiError::CheckTimeout(self.timeout)),
            Ok(Err(e)) => Err(PorttiError::Io(e)),
            Ok(Ok(output)) if output.status.success() => Ok(path),
            Ok(Ok(output)) => Err(PorttiError::ConfigCheck {
                path,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

/// Validates and hands over configurations, skipping byte-identical repeats.
pub struct HaproxyPublisher {
    validator: Validator,
    reload_tx: mpsc::Sender<Reload>,
    last_published: Option<String>,
}

impl HaproxyPublisher {
    pub fn new(config: &ControllerConfig, reload_tx: mpsc::Sender<Reload>) -> Self {
        Self {
            validator: Validator::new(
                &config.haproxy_bin,
                config.check_timeout,
                &config.config_dir,
            ),
            reload_tx,
            last_published: None,
        }
    }
}

impl ConfigPublisher for HaproxyPublisher {
    async fn publish(&mut self, document: &str) -> Result<PublishOutcome, PorttiError> {
        if self.last_published.as_deref() == Some(document) {
            debug!("configuration unchanged, skipping publish");
            return Ok(PublishOutcome::Unchanged);
        }

        let path = self.validator.check(document).await?;
        self.last_published = Some(document.to_string());

        info!("configuration validated: {}", path.display());
        if self.reload_tx.send(Reload { path: path.clone() }).await.is_err() {
            warn!("proxy-control collaborator is gone, reload not delivered");
        }
        Ok(PublishOutcome::Reloaded(path))
    }
}
