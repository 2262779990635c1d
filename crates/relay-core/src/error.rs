use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Distinguishes an upstream apex API error response (whose status/body the caller must be able
/// to pass through verbatim) from every other failure (network/transport, I/O, decode), which
/// the caller treats as "apex unreachable".
#[derive(Debug)]
pub enum Error {
    Apex { status: u16, body: String },
    Other(anyhow::Error),
}

impl Error {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Other(anyhow::Error::msg(message.into()))
    }

    /// A 4xx/5xx response from the apex API, carrying its status code and body verbatim.
    pub fn apex_status(status: u16, body: impl Into<String>) -> Self {
        Self::Apex {
            status,
            body: body.into(),
        }
    }

    /// `Some((status, body))` if this is an apex status error, `None` for every other kind.
    pub fn as_apex_status(&self) -> Option<(u16, &str)> {
        match self {
            Error::Apex { status, body } => Some((*status, body.as_str())),
            Error::Other(_) => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Apex { status, body } => write!(f, "apex responded {status}: {body}"),
            Error::Other(inner) => write!(f, "{inner}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Apex { .. } => None,
            Error::Other(inner) => inner.source(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(inner: anyhow::Error) -> Self {
        Self::Other(inner)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Other(err.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Other(err.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Other(err.into())
    }
}
