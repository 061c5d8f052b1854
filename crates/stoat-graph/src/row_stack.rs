use std::sync::Arc;

use stoat_core::{Elem, Error, FrameRange, Result};

use crate::node::{ComputationNode, NodeRef};
use crate::transform::{Transform, TransformNode};

// RowStack — concatenate the inputs' rows top to bottom
//
// The starting row of each input is a pure function of the inputs' row
// counts, so the offsets are recomputed on every validation pass (row
// counts can change between passes while inference settles) and are
// never read back from a persisted model.

impl<T: Elem> TransformNode<T> {
    pub(crate) fn validate_row_stack(&self, is_final: bool) -> Result<()> {
        let inputs: Vec<NodeRef<T>> = self.inputs.read().expect("inputs lock poisoned").clone();
        if inputs.is_empty() {
            return Err(Error::MissingInput {
                node: self.node_name(),
                expected: 1,
                got: 0,
            });
        }
        let cols = inputs[0].cols();
        let mut offsets = Vec::with_capacity(inputs.len());
        let mut total = 0;
        for input in &inputs {
            offsets.push(total);
            total += input.rows();
            // Column counts may still be inferred on non-final passes.
            if is_final && input.cols() != cols {
                return Err(Error::ColumnCountMismatch {
                    node: self.node_name(),
                    input: input.name().to_string(),
                    expected: cols,
                    got: input.cols(),
                });
            }
        }
        *self.kind.write().expect("kind lock poisoned") = Transform::RowStack { offsets };
        self.resize_output(total, cols);
        self.set_layout(inputs[0].layout().inherit());
        Ok(())
    }

    pub(crate) fn evaluate_row_stack(&self, offsets: &[usize], frame: &FrameRange) -> Result<()> {
        let inputs: Vec<NodeRef<T>> = self.inputs.read().expect("inputs lock poisoned").clone();
        // Column counts follow the minibatch, not the last validation.
        let total_cols = inputs.first().map(|i| i.cols()).unwrap_or(0);
        let total_rows: usize = inputs.iter().map(|i| i.rows()).sum();
        self.ensure_output_extent(total_rows, total_cols);
        let cols = frame.columns(self.num_parallel_sequences(), total_cols)?;
        let mut dst = self.own_value.write().expect("value lock poisoned");
        for (input, &offset) in inputs.iter().zip(offsets) {
            let src_ref = input.value();
            let src = src_ref.read().expect("value lock poisoned");
            dst.copy_rows(&src, 0, offset, src.rows(), cols.clone())?;
        }
        Ok(())
    }

    pub(crate) fn backprop_row_stack(
        &self,
        offsets: &[usize],
        input_index: usize,
        frame: &FrameRange,
    ) -> Result<()> {
        let input = {
            let inputs = self.inputs.read().expect("inputs lock poisoned");
            Arc::clone(&inputs[input_index])
        };
        let cols = self.frame_columns(frame)?;
        let grad = self.own_grad.read().expect("gradient lock poisoned");
        let dst_ref = input.gradient();
        let mut dst = dst_ref.write().expect("gradient lock poisoned");
        let num_rows = dst.rows();
        dst.add_rows(&grad, offsets[input_index], 0, num_rows, cols)
    }
}
