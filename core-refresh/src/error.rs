use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Refresh cancelled")]
    Cancelled,

    #[error("Feed {id} not found in the entity store")]
    UnknownFeed { id: String },

    #[error("{title} ({url}): {message}")]
    Feed {
        title: String,
        url: String,
        message: String,
    },

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, RefreshError>;
