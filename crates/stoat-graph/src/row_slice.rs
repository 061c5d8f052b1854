use stoat_core::{Elem, Error, FrameRange, Result};

use crate::node::ComputationNode;
use crate::transform::TransformNode;

// RowSlice — select a contiguous row band of the input
//
// Columns are untouched, so the layout and the time axis pass straight
// through. The gradient scatters the band back into the matching rows
// of the input's gradient, accumulating.

impl<T: Elem> TransformNode<T> {
    pub(crate) fn validate_row_slice(
        &self,
        start: usize,
        num_rows: usize,
        is_final: bool,
    ) -> Result<()> {
        let input = self.single_input()?;
        let input_rows = input.rows();
        // The input's row count may still be inferred on non-final passes.
        if is_final && start + num_rows > input_rows {
            return Err(Error::SliceOutOfRange {
                node: self.node_name(),
                start,
                num_rows,
                input_rows,
            });
        }
        self.resize_output(num_rows, input.cols());
        self.set_layout(input.layout().inherit());
        Ok(())
    }

    pub(crate) fn evaluate_row_slice(
        &self,
        start: usize,
        num_rows: usize,
        frame: &FrameRange,
    ) -> Result<()> {
        let input = self.single_input()?;
        let src_ref = input.value();
        let src = src_ref.read().expect("value lock poisoned");
        self.ensure_output_extent(num_rows, src.cols());
        let cols = frame.columns(self.num_parallel_sequences(), src.cols())?;
        let mut dst = self.own_value.write().expect("value lock poisoned");
        dst.copy_rows(&src, start, 0, num_rows, cols)
    }

    pub(crate) fn backprop_row_slice(
        &self,
        start: usize,
        num_rows: usize,
        frame: &FrameRange,
    ) -> Result<()> {
        let input = self.single_input()?;
        let grad = self.own_grad.read().expect("gradient lock poisoned");
        let cols = frame.columns(self.num_parallel_sequences(), grad.cols())?;
        let dst_ref = input.gradient();
        let mut dst = dst_ref.write().expect("gradient lock poisoned");
        dst.add_rows(&grad, 0, start, num_rows, cols)
    }
}
