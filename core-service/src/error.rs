use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
