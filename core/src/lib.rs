//! Core profile-processing pipeline for the lidar backscatter platform.
//!
//! The modules implement a streaming chain of stateful transforms over
//! profile chunks: noise removal, calibration, coupling, height and time
//! resampling, output windowing, cloud detection and derived products.
//! Every stage consumes chunks in order, buffers at most a partial window
//! or bin, and flushes on the end-of-stream marker, so an unbounded file
//! sequence is processed with bounded memory.

pub mod dataset;
pub mod io;
pub mod math;
pub mod prelude;
pub mod registry;
pub mod stages;
pub mod telemetry;
pub mod timeutil;
pub mod track;

pub use prelude::{StageError, StageResult, StreamItem, StreamTransform};
