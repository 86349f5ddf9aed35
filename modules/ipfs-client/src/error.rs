use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpfsError>;

#[derive(Debug, Error)]
pub enum IpfsError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Upload returned no root CID")]
    MissingRoot,
}

impl From<reqwest::Error> for IpfsError {
    fn from(err: reqwest::Error) -> Self {
        IpfsError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for IpfsError {
    fn from(err: serde_json::Error) -> Self {
        IpfsError::Parse(err.to_string())
    }
}
