use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("config file not found (searched: {0})")]
    NotFound(String),

    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as TOML")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("environment variable ${0} referenced in config is not set")]
    MissingEnvVar(String),
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
            Self::Message(_) | Self::Read { .. } | Self::Parse { .. } => ErrorKind::Internal,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::MissingEnvVar(_) => ErrorKind::InvalidInput,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatrelay_common::impl_context!();
