pub mod error;
pub mod hmac_sig;
pub mod http;
pub mod tenant;

pub use error::{Error, Result};
pub use http::SafeHttpClient;
pub use tenant::PermissionCache;
