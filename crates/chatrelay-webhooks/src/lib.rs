pub mod error;
pub mod outbox;

pub use error::{Error, Result};
pub use outbox::{RETRY_SCHEDULE_SECS, enqueue_for_event, retry_failed, run_delivery_loop};
