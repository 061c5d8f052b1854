use std::sync::{Arc, RwLock};

use stoat_core::{Elem, Error, Mat, MbLayout, Result};

use crate::hints::ImageHints;

// Node contract — what the transforms need from a producer
//
// The graph framework proper (wiring, scheduling, device placement) lives
// outside this crate. The transforms only need a small contract from each
// upstream producer: a value buffer, a gradient buffer, and the layout
// reference describing how its columns map to (sequence, time) pairs.
//
// Buffers are shared, mutable, and owned by the node that produces them.
// Downstream consumers hold Arc handles; a pure-reinterpretation transform
// hands out the *same* Arc instead of copying, so pointer identity is
// meaningful and tested. Gradient writers must accumulate (add), never
// overwrite — a value may feed multiple downstream paths.

/// A shared, mutable value or gradient buffer.
pub type BufferRef<T> = Arc<RwLock<Mat<T>>>;

/// A shared minibatch layout.
pub type LayoutHandle = Arc<RwLock<MbLayout>>;

/// Allocate a fresh zero-filled buffer handle.
pub fn buffer<T: Elem>(rows: usize, cols: usize) -> BufferRef<T> {
    Arc::new(RwLock::new(Mat::zeros(rows, cols)))
}

/// A node's relationship to its minibatch layout.
///
/// A node that changes the time axis owns a freshly allocated layout and
/// re-derives it every minibatch; a node that leaves the time axis alone
/// aliases the producer's layout. Making the distinction explicit keeps
/// the aliasing rules auditable instead of hiding them in shared pointers.
#[derive(Clone, Default)]
pub enum LayoutRef {
    /// No layout: columns are plain samples without a time axis.
    #[default]
    None,
    /// This node allocated the layout and re-derives it per minibatch.
    Owned(LayoutHandle),
    /// This node shares its input's layout by reference.
    Inherited(LayoutHandle),
}

impl LayoutRef {
    pub fn handle(&self) -> Option<&LayoutHandle> {
        match self {
            LayoutRef::None => None,
            LayoutRef::Owned(h) | LayoutRef::Inherited(h) => Some(h),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, LayoutRef::None)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, LayoutRef::Owned(_))
    }

    /// The reference a downstream node holds when it keeps the time axis:
    /// the same handle, tagged as inherited.
    pub fn inherit(&self) -> LayoutRef {
        match self {
            LayoutRef::None => LayoutRef::None,
            LayoutRef::Owned(h) | LayoutRef::Inherited(h) => LayoutRef::Inherited(Arc::clone(h)),
        }
    }
}

impl std::fmt::Debug for LayoutRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutRef::None => write!(f, "None"),
            LayoutRef::Owned(_) => write!(f, "Owned"),
            LayoutRef::Inherited(_) => write!(f, "Inherited"),
        }
    }
}

/// The contract a transform needs from an upstream producer.
pub trait ComputationNode<T: Elem>: Send + Sync {
    fn name(&self) -> &str;

    /// The value buffer this node produces. For alias-path nodes this is
    /// the input's buffer, not a copy.
    fn value(&self) -> BufferRef<T>;

    /// The gradient buffer consumers accumulate into.
    fn gradient(&self) -> BufferRef<T>;

    /// This node's layout reference.
    fn layout(&self) -> LayoutRef;

    /// Best-effort (width, height, channels) shape hints; purely
    /// diagnostic, never authoritative for row/column counts.
    fn output_hints(&self) -> ImageHints {
        ImageHints::default()
    }

    fn rows(&self) -> usize {
        self.value().read().expect("value lock poisoned").rows()
    }

    fn cols(&self) -> usize {
        self.value().read().expect("value lock poisoned").cols()
    }

    fn has_layout(&self) -> bool {
        !self.layout().is_none()
    }

    fn num_parallel_sequences(&self) -> usize {
        match self.layout().handle() {
            Some(h) => h
                .read()
                .expect("layout lock poisoned")
                .num_parallel_sequences(),
            None => 1,
        }
    }

    fn num_time_steps(&self) -> usize {
        match self.layout().handle() {
            Some(h) => h.read().expect("layout lock poisoned").num_time_steps(),
            None => self.cols(),
        }
    }
}

/// A shared handle to any producer node.
pub type NodeRef<T> = Arc<dyn ComputationNode<T>>;

// SourceNode — a leaf producer standing in for the data source
//
// The deserialization pipeline that actually fills minibatches is out of
// scope here; SourceNode is the minimal stand-in the transforms (and their
// tests) need: a value buffer, a zeroed gradient of the same extent, and
// an optional owned layout refreshed per minibatch.

/// A leaf node holding minibatch data loaded from outside the graph.
pub struct SourceNode<T: Elem> {
    name: String,
    value: BufferRef<T>,
    grad: BufferRef<T>,
    layout: LayoutRef,
    hints: RwLock<ImageHints>,
}

impl<T: Elem> SourceNode<T> {
    /// A source without a layout: columns are independent samples.
    pub fn new(name: impl Into<String>, rows: usize, cols: usize) -> Arc<Self> {
        Arc::new(SourceNode {
            name: name.into(),
            value: buffer(rows, cols),
            grad: buffer(rows, cols),
            layout: LayoutRef::None,
            hints: RwLock::new(ImageHints::new(1, 1, rows)),
        })
    }

    /// A source with an owned layout of the given extent
    /// (`cols = num_seqs * num_steps`).
    pub fn with_layout(
        name: impl Into<String>,
        rows: usize,
        num_seqs: usize,
        num_steps: usize,
    ) -> Arc<Self> {
        let cols = num_seqs * num_steps;
        Arc::new(SourceNode {
            name: name.into(),
            value: buffer(rows, cols),
            grad: buffer(rows, cols),
            layout: LayoutRef::Owned(Arc::new(RwLock::new(MbLayout::with_dims(
                num_seqs, num_steps,
            )))),
            hints: RwLock::new(ImageHints::new(1, 1, rows)),
        })
    }

    /// Replace the value contents for a new minibatch. The gradient buffer
    /// is resized to match and zero-filled. The column count must agree
    /// with the layout when one is present.
    pub fn load_minibatch(&self, data: Mat<T>) -> Result<()> {
        if let Some(h) = self.layout.handle() {
            let expected = h.read().expect("layout lock poisoned").num_cols();
            if data.cols() != expected {
                return Err(Error::msg(format!(
                    "{}: minibatch has {} columns but the layout describes {}",
                    self.name,
                    data.cols(),
                    expected
                )));
            }
        }
        let (rows, cols) = (data.rows(), data.cols());
        *self.value.write().expect("value lock poisoned") = data;
        self.grad
            .write()
            .expect("gradient lock poisoned")
            .resize(rows, cols);
        Ok(())
    }

    /// Zero the gradient buffer between minibatches.
    pub fn reset_gradient(&self) {
        let mut g = self.grad.write().expect("gradient lock poisoned");
        g.fill(T::zero());
    }

    /// The owned layout handle, when this source carries one.
    pub fn layout_handle(&self) -> Option<LayoutHandle> {
        self.layout.handle().cloned()
    }

    pub fn set_hints(&self, hints: ImageHints) {
        *self.hints.write().expect("hints lock poisoned") = hints;
    }
}

impl<T: Elem> ComputationNode<T> for SourceNode<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> BufferRef<T> {
        Arc::clone(&self.value)
    }

    fn gradient(&self) -> BufferRef<T> {
        Arc::clone(&self.grad)
    }

    fn layout(&self) -> LayoutRef {
        self.layout.clone()
    }

    fn output_hints(&self) -> ImageHints {
        *self.hints.read().expect("hints lock poisoned")
    }
}
