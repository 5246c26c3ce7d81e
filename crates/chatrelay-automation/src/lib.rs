pub mod error;
pub mod flow;
pub mod pipeline;
pub mod skip_expr;

pub use error::{Error, Result};
pub use flow::{FlowEngine, StepAction};
pub use pipeline::{Pipeline, PipelineOutcome};
