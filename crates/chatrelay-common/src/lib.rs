pub mod error;
pub mod events;
pub mod ids;
pub mod time;

pub use error::{Context, Error, ErrorKind, FromMessage, Result};
