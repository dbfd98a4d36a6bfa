use crate::tasks::config::ControllerConfig;
use kube::Client;
use std::sync::Arc;
use thiserror::Error;

/// Shared state handed to every reconciliation pass
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Object is missing required key {0}")]
    MissingObjectKey(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// API status code carried by the error, if it came from the API server
    #[must_use]
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::KubeError(kube::Error::Api(response)) => Some(response.code),
            _ => None,
        }
    }

    /// Optimistic-concurrency failure; the next pass re-reads and retries.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
