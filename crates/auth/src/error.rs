use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed token: {0}")]
    MalformedToken(&'static str),

    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Base64(#[from] base64::DecodeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
