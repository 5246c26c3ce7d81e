use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error(transparent)]
    Db(#[from] chatrelay_db::Error),
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
            Self::Message(_) => ErrorKind::Internal,
            Self::InvalidSignature => ErrorKind::Unauthenticated,
            Self::UnknownAccount(_) => ErrorKind::NotFound,
            Self::Db(err) => err.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatrelay_common::impl_context!();
