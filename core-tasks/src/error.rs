use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
