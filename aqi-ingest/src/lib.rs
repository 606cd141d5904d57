pub mod pipeline;
pub mod config;
pub mod sources;
pub mod sinks;
pub mod transform;
pub mod snapshot;
pub mod observability;
pub mod metrics_export;

pub use pipeline::{Envelope, Pipeline};
