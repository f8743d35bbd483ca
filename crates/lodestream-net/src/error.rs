use thiserror::Error;

/// Centralized error type for lodestream-net.
#[derive(Debug, Error, Clone)]
pub enum NetError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("socket io error: {0}")]
    Socket(String),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("wire codec error: {0}")]
    Codec(String),

    #[error("connection closed (graceful: {graceful})")]
    Closed { graceful: bool },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP {status} for URL: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Timeout")]
    Timeout,
}

impl NetError {
    pub fn connect<S: Into<String>>(msg: S) -> Self {
        Self::Connect(msg.into())
    }

    pub fn socket(err: &std::io::Error) -> Self {
        Self::Socket(err.to_string())
    }

    pub fn http<S: Into<String>>(msg: S) -> Self {
        Self::Http(msg.into())
    }

    pub fn http_status(status: u16, url: String) -> Self {
        Self::HttpStatus { status, url }
    }

    /// Checks if this error is considered retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Connect(_) | NetError::Socket(_) | NetError::Timeout => true,
            NetError::Closed { graceful } => !graceful,
            NetError::HttpStatus { status, .. } => {
                // Retry on 5xx server errors, 429 Too Many Requests, 408.
                *status >= 500 || *status == 429 || *status == 408 || *status == 0
            }
            NetError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connection") || msg.contains("network")
            }
            NetError::Handshake(_) | NetError::Codec(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout)
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            NetError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        if let Some(status) = error.status() {
            return Self::HttpStatus {
                status: status.as_u16(),
                url: error
                    .url()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            };
        }
        Self::Http(error.to_string())
    }
}

pub type NetResult<T> = Result<T, NetError>;
