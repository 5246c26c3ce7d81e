use thiserror::Error;

/// Coarse error classification shared across every `chatrelay-*` crate,
/// used to decide retry/backoff behavior and HTTP status mapping without
/// each caller matching on crate-specific variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    Conflict,
    UpstreamFailed,
    Throttled,
    Internal,
}

/// Crate-wide error type shared by every `chatrelay-*` crate that does not
/// need its own domain-specific variants.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("external error: {context}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("internal error")]
    Other {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn other(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other {
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Message(_) => ErrorKind::Internal,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io(_) | Self::External { .. } | Self::Other { .. } => ErrorKind::Internal,
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for a crate's own error type, then invoke [`impl_context!`]
/// in that crate's error module to get `.context()` / `.with_context()` on
/// `Result` and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generates a crate-local `Context` trait with `.context()` and
/// `.with_context()` methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::error::FromMessage>::from_message(format!(
                        "{ctx}: {source}"
                    ))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::error::FromMessage>::from_message(format!(
                        "{ctx}: {source}"
                    ))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| {
                    <Error as $crate::error::FromMessage>::from_message(context.into())
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| {
                    <Error as $crate::error::FromMessage>::from_message(f().into())
                })
            }
        }
    };
}

impl_context!();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_message() {
        let res: std::result::Result<(), &str> = Err("boom");
        let wrapped = res.context("loading account");
        assert!(matches!(wrapped, Err(Error::Message(m)) if m == "loading account: boom"));
    }

    #[test]
    fn option_context_produces_message() {
        let none: Option<u32> = None;
        let wrapped = none.context("missing org_id");
        assert!(matches!(wrapped, Err(Error::Message(m)) if m == "missing org_id"));
    }
}
