pub mod error;
pub mod loader;
pub mod schema;

pub use error::{Error, Result};
pub use loader::{discover_and_load, find_config_file, load_config};
pub use schema::{BootConfig, LogFormat};
