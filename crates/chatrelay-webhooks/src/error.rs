use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Db(#[from] chatrelay_db::Error),

    #[error(transparent)]
    Security(#[from] chatrelay_security::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
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
            Self::Message(_) | Self::Json(_) => ErrorKind::Internal,
            Self::Db(err) => err.kind(),
            Self::Security(err) => err.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatrelay_common::impl_context!();
