use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("poll error: {0}")]
    Poll(#[from] lcap_poller::PollError),

    #[error("message error: {0}")]
    Message(#[from] lcap_messages::MessageError),

    #[error("config error: {0}")]
    Config(String),

    #[error("content error: {0}")]
    Content(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity store error: {0}")]
    Identity(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("poll service stopped")]
    ServiceStopped,

    #[error("shutdown timeout")]
    ShutdownTimeout,
}
