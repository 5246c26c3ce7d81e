use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("blocked by SSRF policy: {0}")]
    SsrfBlocked(String),

    #[error("DNS resolution failed for {0}")]
    DnsResolutionFailed(String),

    #[error("URL has no host: {0}")]
    NoHost(String),

    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl chatrelay_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> chatrelay_common::ErrorKind {
        use chatrelay_common::ErrorKind;
        match self {
            Self::Message(_) | Self::Io(_) => ErrorKind::Internal,
            Self::SsrfBlocked(_) => ErrorKind::PermissionDenied,
            Self::DnsResolutionFailed(_) | Self::NoHost(_) | Self::InvalidUrl(_) => ErrorKind::InvalidInput,
            Self::Request(_) => ErrorKind::UpstreamFailed,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatrelay_common::impl_context!();
