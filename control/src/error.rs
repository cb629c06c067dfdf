use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// PORTTI Control Plane Errors
#[derive(Error, Debug)]
pub enum PorttiError {
    #[error("Kubernetes error: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event channel closed")]
    ChannelClosed,

    #[error("HAProxy rejected configuration {path}: {reason}")]
    ConfigCheck { path: PathBuf, reason: String },

    #[error("HAProxy config check timed out after {0:?}")]
    CheckTimeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
