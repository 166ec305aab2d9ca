// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compose asynchronous record-processing stages into a single stage.
//!
//! A [`Stage`] is a source, a sink, a transform or a passthrough, driven by its own Tokio task
//! with bounded queues on both sides. [`compose_pipeline`] (or the [`compose!`] macro) connects
//! any number of stages left to right and hands back one stage standing for the whole chain:
//!
//! - Records flow through the chain in order, with backpressure between every two stages.
//! - A failure anywhere in the chain shows up, unchanged, on the composite after the records
//!   emitted before it. All other stages of the chain are torn down.
//! - Composites can be composed again, nesting is equivalent to composing the flat list.
//!
//! Chains starting with a source return their last stage. Chains starting with a writable stage
//! are wrapped behind a new stage which accepts writes and finishes only after the whole chain
//! has finished.
mod capabilities;
#[macro_use]
mod compose;
mod config;
mod error;
mod stage;
#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

pub use capabilities::Capabilities;
pub use compose::{compose_linear, compose_pipeline, compose_pipeline_with, wrap_reusable};
pub use config::{DEFAULT_BUFFER_SIZE, StageConfig};
pub use error::{BoxError, ErrorKind, StageError, WiringError};
pub use stage::{Lifecycle, Stage, StageId, StageKind, StageReader};
