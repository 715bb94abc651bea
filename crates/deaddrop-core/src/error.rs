use thiserror::Error;

pub type DeaddropResult<T> = Result<T, DeaddropError>;

#[derive(Debug, Error)]
pub enum DeaddropError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
