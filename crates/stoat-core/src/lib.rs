//! # stoat-core
//!
//! Dense matrix buffers and minibatch sequence layouts for stoat.
//!
//! This crate provides:
//! - [`Mat`] — a row-major 2-D numeric buffer (rows = features, cols = samples)
//! - [`MbLayout`] / [`PackingFlags`] — per-(sequence, time) boundary metadata
//! - [`FrameRange`] — "all columns" or a single (sequence, time) sub-range
//! - [`DType`] / [`Elem`] — the supported element types (f32, f64)
//! - [`Error`] / [`Result`] — the failure taxonomy shared across the workspace
//!
//! The transform nodes that consume these live in `stoat-graph`.

pub mod elem;
pub mod error;
pub mod frame;
pub mod layout;
pub mod matrix;

pub use elem::{DType, Elem};
pub use error::{Error, Result};
pub use frame::FrameRange;
pub use layout::{MbLayout, PackingFlags};
pub use matrix::{Mat, StackDims};
