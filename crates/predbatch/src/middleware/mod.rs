//! Tower middleware exposing the batcher over HTTP.

mod layer;
mod service;

pub use layer::BatcherLayer;
pub use service::{BatcherHandle, BatcherService};
