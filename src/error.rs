use std::time::Duration;

use crate::worker::RequestId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("request {id} timed out after {timeout:?}")]
    RequestTimeout { id: RequestId, timeout: Duration },
    #[error("layout worker terminated while handling request {id}")]
    WorkerCrashed { id: RequestId },
    #[error("background layout workers are unavailable")]
    WorkerUnavailable,
    #[error("coordinator has been shut down")]
    ShutDown,
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("node {0} is not a cluster")]
    NotACluster(String),
    #[error("pin position for node {0} is not finite")]
    InvalidPin(String),
    #[error("no retained layout for request {0}")]
    UnknownLayout(RequestId),
    #[error("worker answered with a response of the wrong kind")]
    UnexpectedResponse,
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
