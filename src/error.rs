use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Acquire timed out")]
    Timeout,

    #[error("Connection pool closed")]
    PoolClosed,

    #[error("Connection creation failed: {0}")]
    CreateFailed(String),

    #[error("Connection unhealthy: {0}")]
    Unhealthy(String),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}
