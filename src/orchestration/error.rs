use crate::assistant::TransportError;
use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start transport for role `{role}`: {source}")]
    TransportStart {
        role: String,
        #[source]
        source: TransportError,
    },
    #[error("transport error for role `{role}`: {source}")]
    Transport {
        role: String,
        #[source]
        source: TransportError,
    },
    #[error("handshake timed out for role `{role}` after {timeout_ms}ms")]
    HandshakeTimeout { role: String, timeout_ms: u64 },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> OrchestratorError {
    OrchestratorError::Io {
        path: path.display().to_string(),
        source,
    }
}
