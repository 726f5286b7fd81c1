pub mod gateway;
pub mod limits;
pub mod matcher;
pub mod pipeline;
pub mod pricing;
pub mod store;

pub use limits::SharedLimits;
pub use pipeline::{CycleResult, Pipeline, PipelineConfig};
