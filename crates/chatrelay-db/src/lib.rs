pub mod entities;
pub mod error;
#[cfg(feature = "test-util")]
pub mod fakes;
pub mod pg;
pub mod pool;
pub mod repo;

pub use error::{Error, Result};
#[cfg(feature = "test-util")]
pub use fakes::InMemoryDatabase;
pub use pg::PgDatabase;
pub use pool::{connect, run_migrations};
pub use repo::Database;
