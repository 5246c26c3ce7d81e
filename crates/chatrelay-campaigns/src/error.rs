use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("campaign not running")]
    NotRunning,

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
            Self::NotRunning => ErrorKind::Conflict,
            Self::Db(err) => err.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatrelay_common::impl_context!();
