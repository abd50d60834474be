use clawlink_protocol::ErrorShape;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(Box<tokio_tungstenite::tungstenite::Error>),

    #[error(transparent)]
    InvalidHeader(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] clawlink_protocol::Error),

    /// The gateway rejected the `connect` request.
    #[error("{0}")]
    Handshake(ErrorShape),

    /// The gateway answered a request with `ok: false`.
    #[error("{0}")]
    Request(ErrorShape),

    #[error("gateway closed ({code}): {reason}")]
    Closed { code: u16, reason: String },

    #[error("gateway connection lost: {0}")]
    ConnectionLost(String),

    #[error("gateway client stopped")]
    Stopped,

    #[error("gateway not connected")]
    NotConnected,
}

impl Error {
    /// The server-side error, when the failure came from a response frame.
    pub fn error_shape(&self) -> Option<&ErrorShape> {
        match self {
            Self::Handshake(shape) | Self::Request(shape) => Some(shape),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
