//! # Batching Engine
//!
//! The core module holds everything behind the ingress side: the per-path
//! batch state, the accumulator task that owns it, and the dispatch step that
//! turns a batch into one downstream call.
//!
//! ## Module Structure
//!
//! * [`batch`] - Batch state: concatenated instances, per-caller index ranges
//!   and the fan-out of a downstream outcome back to each caller.
//!
//! * [`accumulator`] - The long-running loop that admits submissions,
//!   evaluates the size and latency triggers and flushes batches one at a time.
//!
//! * [`dispatch`] - Builds the batched downstream request and decodes its
//!   predictions.
//!
//! * [`downstream`] - The `Downstream` trait, the only contract the engine
//!   has with the handler it batches for.
//!
//! * [`worker`] - Lifecycle handle for the accumulator task: stop signal,
//!   drain and join.
//!
pub(crate) mod accumulator;
pub(crate) mod batch;
pub(crate) mod dispatch;
pub mod downstream;
pub(crate) mod worker;
