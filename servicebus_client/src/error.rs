use servicebus_codec::ConnectionStringError;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Invalid connection string")]
    ConnectionString(#[from] ConnectionStringError),

    #[error("Connection string is scoped to entity `{scoped}` but topic `{topic}` was requested")]
    EntityPathMismatch { scoped: String, topic: String },

    #[error("Failed to set up HTTP client")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported message options: {0}")]
    UnsupportedOptions(&'static str),

    #[error("Listener stopped receiving messages: {0}")]
    ListenerFailed(String),

    #[error("Listener task ended abnormally")]
    Join(#[from] tokio::task::JoinError),
}
