//! # stoat-graph
//!
//! Row-dimension transform nodes over minibatch buffers for stoat.
//!
//! This crate provides:
//! - [`TransformNode`] / [`Transform`] — Reshape, RowSlice, RowStack, and
//!   RowRepeat nodes with validate / evaluate / backpropagate lifecycles
//! - [`ComputationNode`] — the contract a transform needs from an upstream
//!   producer (value, gradient, layout)
//! - [`SourceNode`] — a minimal leaf producer for loading minibatch data
//! - [`ImageHints`] — best-effort (width, height, channels) output metadata
//! - [`model`] — binary persistence of per-node transform configuration

pub mod hints;
pub mod model;
pub mod node;
pub mod transform;

mod reshape;
mod row_repeat;
mod row_slice;
mod row_stack;

pub use hints::ImageHints;
pub use model::MODEL_VERSION;
pub use node::{buffer, BufferRef, ComputationNode, LayoutHandle, LayoutRef, NodeRef, SourceNode};
pub use transform::{CopyFlags, Phase, Transform, TransformNode};

pub use stoat_core::{
    DType, Elem, Error, FrameRange, Mat, MbLayout, PackingFlags, Result, StackDims,
};
