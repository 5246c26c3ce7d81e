pub mod error;
pub mod worker;

pub use error::{Error, Result};
pub use worker::{CampaignWorker, RecipientSender, pause, resume};
