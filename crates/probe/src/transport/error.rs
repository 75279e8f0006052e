use thiserror::Error;

/// Failure of a single HTTP attempt before a complete response was read
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("dns lookup failed: {0}")]
    Dns(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("request timed out")]
    Timeout,
    #[error("http protocol error: {0}")]
    Protocol(String),
    #[error("response body exceeded {0} bytes")]
    BodyTooLarge(usize),
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),
    /// Anything else, such as an invalid header name
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Stable classification stored in a result's `err` field
    pub fn code(&self) -> String {
        let code = match self {
            TransportError::InvalidUrl(_) => "ERR_INVALID_URL",
            TransportError::Dns(_) => "ERR_DNS",
            TransportError::ConnectionRefused(_) => "ERR_CONNECTION_REFUSED",
            TransportError::Connect(_) => "ERR_CONNECT",
            TransportError::Tls(_) => "ERR_TLS",
            TransportError::Timeout => "ERR_TIMEOUT",
            TransportError::Protocol(_) => "ERR_PROTOCOL",
            TransportError::BodyTooLarge(_) => "ERR_BODY_TOO_LARGE",
            TransportError::TooManyRedirects(_) => "ERR_TOO_MANY_REDIRECTS",
            TransportError::Other(message) => return message.clone(),
        };
        code.to_string()
    }

    /// Whether this failure came from the network layer rather than from
    /// malformed input.
    pub fn is_network(&self) -> bool {
        !matches!(self, TransportError::InvalidUrl(_) | TransportError::Other(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(err.to_string()),
            std::io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Connect(err.to_string()),
        }
    }
}

impl From<http::Error> for TransportError {
    fn from(err: http::Error) -> Self {
        TransportError::Other(err.to_string())
    }
}

impl From<hyper::Error> for TransportError {
    fn from(err: hyper::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}
