#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] clawlink_client::Error),

    #[error("unexpected {method} response: {source}")]
    Response {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The gateway's error shape, when the request itself was refused.
    pub fn error_shape(&self) -> Option<&clawlink_protocol::ErrorShape> {
        match self {
            Self::Client(err) => err.error_shape(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
