use thiserror::Error;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("Log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction {0} is not active")]
    TransactionNotActive(u64),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Malformed log record: {0}")]
    MalformedRecord(String),

    #[error("Failed to start conflict detector: {0}")]
    DetectorSpawn(String),
}

pub type Result<T> = std::result::Result<T, WalError>;
