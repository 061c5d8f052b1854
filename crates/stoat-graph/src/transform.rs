use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use stoat_core::{Elem, Error, FrameRange, MbLayout, Result};

use crate::hints::{infer_reshape_hints, repeat_hints, row_op_hints, ImageHints};
use crate::model;
use crate::node::{buffer, BufferRef, ComputationNode, LayoutRef, NodeRef};

// Transform nodes — row-dimension surgery over minibatch buffers
//
// All four transforms share one node type with a tagged configuration
// enum; the per-variant validation, evaluation, and gradient code lives
// in sibling files as impl blocks on TransformNode. Dispatch is a plain
// match on the variant, which keeps each operation's three phases
// (validate / evaluate / backpropagate) next to each other.

/// Where a node stands in the validate/evaluate lifecycle.
///
/// Validation runs in passes: early passes tolerate dimensions that are
/// still being inferred elsewhere in the graph, and only the final pass
/// enforces the hard configuration constraints. Evaluation and gradient
/// propagation refuse to run until a final pass has succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Unvalidated,
    Validating {
        is_final: bool,
    },
    Ready,
}

/// The static configuration of a transform node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    /// Reinterpret the input as `target_rows` rows, preserving element
    /// count and column-major traversal order of samples within a column.
    Reshape {
        target_rows: usize,
        hints: ImageHints,
    },
    /// Select the contiguous row band `[start, start + num_rows)`.
    RowSlice { start: usize, num_rows: usize },
    /// Concatenate the inputs' rows top to bottom. `offsets[i]` is the
    /// output row where input `i` begins; recomputed on every validation
    /// pass, never trusted from a loaded model.
    RowStack { offsets: Vec<usize> },
    /// Stack `repeat` copies of the input's rows.
    RowRepeat { repeat: usize },
}

impl Transform {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Transform::Reshape { .. } => "Reshape",
            Transform::RowSlice { .. } => "RowSlice",
            Transform::RowStack { .. } => "RowStack",
            Transform::RowRepeat { .. } => "RowRepeat",
        }
    }
}

/// What `copy_config_to` carries over.
#[derive(Debug, Clone, Copy)]
pub struct CopyFlags {
    /// Copy the variant's configuration fields.
    pub config: bool,
    /// Copy the input wiring.
    pub inputs: bool,
}

impl Default for CopyFlags {
    fn default() -> Self {
        CopyFlags {
            config: true,
            inputs: true,
        }
    }
}

pub(crate) struct NodeState {
    pub(crate) phase: Phase,
    pub(crate) layout: LayoutRef,
    pub(crate) hints: ImageHints,
}

/// A node applying one of the row transforms to its input(s).
///
/// The node owns its output value and gradient buffers, except on the
/// alias path: a reshape that changes nothing and a repeat of 1 hand out
/// their input's buffers directly, so `value()` on those nodes is pointer
/// identical to the input's.
pub struct TransformNode<T: Elem> {
    name: String,
    pub(crate) kind: RwLock<Transform>,
    pub(crate) inputs: RwLock<Vec<NodeRef<T>>>,
    pub(crate) own_value: BufferRef<T>,
    pub(crate) own_grad: BufferRef<T>,
    pub(crate) state: RwLock<NodeState>,
}

impl<T: Elem> TransformNode<T> {
    fn with_kind(name: impl Into<String>, kind: Transform, inputs: Vec<NodeRef<T>>) -> Arc<Self> {
        Arc::new(TransformNode {
            name: name.into(),
            kind: RwLock::new(kind),
            inputs: RwLock::new(inputs),
            own_value: buffer(0, 0),
            own_grad: buffer(0, 0),
            state: RwLock::new(NodeState {
                phase: Phase::Unvalidated,
                layout: LayoutRef::None,
                hints: ImageHints::default(),
            }),
        })
    }

    pub fn reshape(
        name: impl Into<String>,
        target_rows: usize,
        hints: ImageHints,
        input: NodeRef<T>,
    ) -> Arc<Self> {
        Self::with_kind(name, Transform::Reshape { target_rows, hints }, vec![input])
    }

    pub fn row_slice(
        name: impl Into<String>,
        start: usize,
        num_rows: usize,
        input: NodeRef<T>,
    ) -> Arc<Self> {
        Self::with_kind(name, Transform::RowSlice { start, num_rows }, vec![input])
    }

    pub fn row_stack(name: impl Into<String>, inputs: Vec<NodeRef<T>>) -> Arc<Self> {
        Self::with_kind(name, Transform::RowStack { offsets: Vec::new() }, inputs)
    }

    pub fn row_repeat(name: impl Into<String>, repeat: usize, input: NodeRef<T>) -> Arc<Self> {
        Self::with_kind(name, Transform::RowRepeat { repeat }, vec![input])
    }

    pub fn kind(&self) -> Transform {
        self.kind.read().expect("kind lock poisoned").clone()
    }

    /// Run one validation pass. Non-final passes size buffers and derive
    /// layouts without enforcing constraints that depend on dimensions
    /// still settling; the final pass enforces everything and, on success,
    /// marks the node ready to evaluate.
    pub fn validate(&self, is_final: bool) -> Result<()> {
        {
            let mut st = self.state.write().expect("state lock poisoned");
            st.phase = Phase::Validating { is_final };
        }
        let kind = self.kind();
        let result = match kind {
            Transform::Reshape { target_rows, .. } => self.validate_reshape(target_rows, is_final),
            Transform::RowSlice { start, num_rows } => {
                self.validate_row_slice(start, num_rows, is_final)
            }
            Transform::RowStack { .. } => self.validate_row_stack(is_final),
            Transform::RowRepeat { repeat } => self.validate_row_repeat(repeat, is_final),
        };
        if result.is_ok() {
            self.infer_output_hints();
            if is_final {
                let mut st = self.state.write().expect("state lock poisoned");
                st.phase = Phase::Ready;
            }
        }
        result
    }

    /// Recompute and store the best-effort (width, height, channels) hints
    /// for this node's output. Called at the end of every successful
    /// validation pass; hint trouble only warns, never fails.
    pub fn infer_output_hints(&self) -> ImageHints {
        let inherited = {
            let inputs = self.inputs.read().expect("inputs lock poisoned");
            inputs.first().map(|i| i.output_hints()).unwrap_or_default()
        };
        let computed = match self.kind() {
            Transform::Reshape { target_rows, hints } if target_rows > 0 => {
                infer_reshape_hints(hints, target_rows, inherited, self.name())
            }
            Transform::Reshape { .. } => ImageHints::default(),
            Transform::RowSlice { num_rows, .. } => {
                row_op_hints(inherited, num_rows, "RowSlice", self.name())
            }
            Transform::RowStack { .. } => {
                let total = self.own_value.read().expect("value lock poisoned").rows();
                row_op_hints(inherited, total, "RowStack", self.name())
            }
            Transform::RowRepeat { repeat } => {
                let in_rows = self.single_input().map(|i| i.rows()).unwrap_or(0);
                repeat_hints(inherited, repeat, in_rows * repeat, self.name())
            }
        };
        self.set_hints(computed);
        computed
    }

    /// Refresh this node's layout for a new minibatch. Only nodes that own
    /// their layout (a time-fusing reshape) derive anything; everyone else
    /// reads through to the producer's layout and has nothing to do.
    pub fn begin_minibatch(&self) -> Result<()> {
        match self.kind() {
            Transform::Reshape { target_rows, .. } => self.begin_minibatch_reshape(target_rows),
            _ => Ok(()),
        }
    }

    /// Compute this node's output for the given frame range.
    pub fn evaluate(&self, frame: &FrameRange) -> Result<()> {
        self.require_ready()?;
        match self.kind() {
            Transform::Reshape { target_rows, .. } => self.evaluate_reshape(target_rows, frame),
            Transform::RowSlice { start, num_rows } => {
                self.evaluate_row_slice(start, num_rows, frame)
            }
            Transform::RowStack { offsets } => self.evaluate_row_stack(&offsets, frame),
            Transform::RowRepeat { repeat } => self.evaluate_row_repeat(repeat, frame),
        }
    }

    /// Accumulate this node's output gradient into input `input_index`'s
    /// gradient buffer, for the given frame range.
    pub fn backpropagate(&self, input_index: usize, frame: &FrameRange) -> Result<()> {
        self.require_ready()?;
        let num_inputs = self.inputs.read().expect("inputs lock poisoned").len();
        if input_index >= num_inputs {
            return Err(Error::InputIndexOutOfRange {
                node: self.name.clone(),
                index: input_index,
                num_inputs,
            });
        }
        match self.kind() {
            Transform::Reshape { target_rows, .. } => self.backprop_reshape(target_rows, frame),
            Transform::RowSlice { start, num_rows } => {
                self.backprop_row_slice(start, num_rows, frame)
            }
            Transform::RowStack { offsets } => self.backprop_row_stack(&offsets, input_index, frame),
            Transform::RowRepeat { repeat } => self.backprop_row_repeat(repeat, frame),
        }
    }

    /// Whether this node is a pure reinterpretation that aliases its
    /// input's buffers instead of owning output storage.
    pub fn is_noop(&self) -> bool {
        match &*self.kind.read().expect("kind lock poisoned") {
            Transform::Reshape { target_rows, .. } => match self.single_input() {
                Ok(input) => input.rows() == *target_rows,
                Err(_) => false,
            },
            Transform::RowRepeat { repeat } => *repeat == 1,
            _ => false,
        }
    }

    /// Replace input `index`'s wiring. Invalidates the node.
    pub fn attach_input(&self, index: usize, input: NodeRef<T>) -> Result<()> {
        {
            let mut inputs = self.inputs.write().expect("inputs lock poisoned");
            if index >= inputs.len() {
                return Err(Error::InputIndexOutOfRange {
                    node: self.name.clone(),
                    index,
                    num_inputs: inputs.len(),
                });
            }
            inputs[index] = input;
        }
        self.state.write().expect("state lock poisoned").phase = Phase::Unvalidated;
        Ok(())
    }

    /// Replace the whole input list (RowStack accepts any count).
    /// Invalidates the node.
    pub fn set_inputs(&self, inputs: Vec<NodeRef<T>>) {
        *self.inputs.write().expect("inputs lock poisoned") = inputs;
        self.state.write().expect("state lock poisoned").phase = Phase::Unvalidated;
    }

    pub fn reset_gradient(&self) {
        let mut g = self.own_grad.write().expect("gradient lock poisoned");
        g.fill(T::zero());
    }

    /// Persist this node's configuration as a model fragment.
    pub fn save_config<W: Write>(&self, w: &mut W) -> Result<()> {
        model::save_transform(w, &self.kind())
    }

    /// Restore configuration from a model fragment written by
    /// `save_config`. The variant must match this node's; wiring and
    /// buffers are untouched, and the node must be revalidated.
    pub fn load_config<R: Read>(&self, r: &mut R, model_version: u32) -> Result<()> {
        let loaded = model::load_transform(r, model_version)?;
        {
            let mut kind = self.kind.write().expect("kind lock poisoned");
            if std::mem::discriminant(&loaded) != std::mem::discriminant(&*kind) {
                return Err(Error::msg(format!(
                    "{}: model fragment holds a {} but this node is a {}",
                    self.name,
                    loaded.kind_name(),
                    kind.kind_name()
                )));
            }
            *kind = loaded;
        }
        self.state.write().expect("state lock poisoned").phase = Phase::Unvalidated;
        Ok(())
    }

    /// Copy configuration (and optionally wiring) onto another node of the
    /// same variant. The target is invalidated.
    pub fn copy_config_to(&self, target: &TransformNode<T>, flags: CopyFlags) -> Result<()> {
        if flags.config {
            let src = self.kind();
            let mut dst = target.kind.write().expect("kind lock poisoned");
            if std::mem::discriminant(&src) != std::mem::discriminant(&*dst) {
                return Err(Error::msg(format!(
                    "cannot copy {} configuration from {} onto {} node {}",
                    src.kind_name(),
                    self.name,
                    dst.kind_name(),
                    target.name
                )));
            }
            *dst = src;
        }
        if flags.inputs {
            let src = self.inputs.read().expect("inputs lock poisoned").clone();
            *target.inputs.write().expect("inputs lock poisoned") = src;
        }
        target.state.write().expect("state lock poisoned").phase = Phase::Unvalidated;
        Ok(())
    }

    // ---- shared helpers for the per-variant impls ----

    pub(crate) fn require_ready(&self) -> Result<()> {
        let st = self.state.read().expect("state lock poisoned");
        if st.phase != Phase::Ready {
            return Err(Error::NotReady {
                node: self.name.clone(),
            });
        }
        Ok(())
    }

    /// The single input of a one-input transform.
    pub(crate) fn single_input(&self) -> Result<NodeRef<T>> {
        let inputs = self.inputs.read().expect("inputs lock poisoned");
        match inputs.first() {
            Some(input) => Ok(Arc::clone(input)),
            None => Err(Error::MissingInput {
                node: self.name.clone(),
                expected: 1,
                got: 0,
            }),
        }
    }

    /// The column range of this node's output that `frame` addresses.
    pub(crate) fn frame_columns(&self, frame: &FrameRange) -> Result<std::ops::Range<usize>> {
        frame.columns(self.num_parallel_sequences(), self.cols())
    }

    /// Match the output value and gradient buffers to the given extent.
    /// Input shapes may change between minibatches without a revalidation,
    /// so every evaluation re-derives its extent from the inputs and calls
    /// this first. Reallocates (and zero-fills) only on disagreement;
    /// already-correct buffers keep their contents.
    pub(crate) fn ensure_output_extent(&self, rows: usize, cols: usize) {
        {
            let mut v = self.own_value.write().expect("value lock poisoned");
            if v.rows() != rows || v.cols() != cols {
                v.resize(rows, cols);
            }
        }
        let mut g = self.own_grad.write().expect("gradient lock poisoned");
        if g.rows() != rows || g.cols() != cols {
            g.resize(rows, cols);
        }
    }

    pub(crate) fn resize_output(&self, rows: usize, cols: usize) {
        self.own_value
            .write()
            .expect("value lock poisoned")
            .resize(rows, cols);
        self.own_grad
            .write()
            .expect("gradient lock poisoned")
            .resize(rows, cols);
    }

    pub(crate) fn set_layout(&self, layout: LayoutRef) {
        self.state.write().expect("state lock poisoned").layout = layout;
    }

    pub(crate) fn set_hints(&self, hints: ImageHints) {
        self.state.write().expect("state lock poisoned").hints = hints;
    }

    pub(crate) fn owned_layout_handle(&self) -> Option<Arc<RwLock<MbLayout>>> {
        let st = self.state.read().expect("state lock poisoned");
        if st.layout.is_owned() {
            st.layout.handle().cloned()
        } else {
            None
        }
    }

    pub(crate) fn err_not_implemented(&self, what: &'static str) -> Error {
        Error::NotImplemented {
            node: self.name.clone(),
            what,
        }
    }

    pub(crate) fn node_name(&self) -> String {
        self.name.clone()
    }
}

impl<T: Elem> ComputationNode<T> for TransformNode<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> BufferRef<T> {
        if self.is_noop() {
            if let Ok(input) = self.single_input() {
                return input.value();
            }
        }
        Arc::clone(&self.own_value)
    }

    fn gradient(&self) -> BufferRef<T> {
        if self.is_noop() {
            if let Ok(input) = self.single_input() {
                return input.gradient();
            }
        }
        Arc::clone(&self.own_grad)
    }

    fn layout(&self) -> LayoutRef {
        self.state.read().expect("state lock poisoned").layout.clone()
    }

    fn output_hints(&self) -> ImageHints {
        self.state.read().expect("state lock poisoned").hints
    }
}
