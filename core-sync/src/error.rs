use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync cancelled")]
    Cancelled,

    #[error("Credentials unavailable for the sync service")]
    CredentialsUnavailable,

    #[error("Sync connection failed: {0}")]
    Connection(String),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
