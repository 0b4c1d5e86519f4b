use thiserror::Error;

pub type Result<T> = std::result::Result<T, DataServerError>;

#[derive(Error, Debug)]
pub enum DataServerError {
    #[error("IO error {0}")]
    IOError(#[from] std::io::Error),

    #[error("FSD decode error {0}")]
    FsdError(#[from] fsd::FsdError),

    #[error("connection to FSD hub closed")]
    ConnectionClosed,

    #[error("line from FSD hub exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("config error {0}")]
    ConfigError(String),

    #[error("RON error {0}")]
    RonError(#[from] ron::error::SpannedError),

    #[error("JSON error {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("upload error {0}")]
    UploadError(String),

    #[error("event bus error {0}")]
    EventBusError(String),

    #[error("operation failed {0}")]
    OpFailedError(String),
}

macro_rules! config_error {
    ($fmt:literal $(, $arg:expr )* ) => {
        $crate::errors::DataServerError::ConfigError( format!( $fmt $(, $arg)* ))
    };
}
pub(crate) use config_error;
