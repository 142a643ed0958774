use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the chat client. Collaborator failures are converted
/// at the session-store boundary into conversational bot messages; they never
/// reach the UI layer as raw errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("chat {0} not found")]
    ChatNotFound(i64),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
