use stoat_core::{Elem, Error, FrameRange, Result};

use crate::node::ComputationNode;
use crate::transform::TransformNode;

// RowRepeat — stack `repeat` copies of the input's rows
//
// `repeat == 1` is the identity and takes the alias path. The gradient
// folds the copies back down: each input row receives the sum of the
// gradients of all its copies.

impl<T: Elem> TransformNode<T> {
    pub(crate) fn validate_row_repeat(&self, repeat: usize, is_final: bool) -> Result<()> {
        let input = self.single_input()?;
        if repeat == 0 {
            if is_final {
                return Err(Error::InvalidRepeatCount {
                    node: self.node_name(),
                });
            }
            return Ok(());
        }
        if repeat > 1 {
            self.resize_output(input.rows() * repeat, input.cols());
        }
        self.set_layout(input.layout().inherit());
        Ok(())
    }

    pub(crate) fn evaluate_row_repeat(&self, repeat: usize, frame: &FrameRange) -> Result<()> {
        if self.is_noop() {
            return Ok(());
        }
        let input = self.single_input()?;
        let src_ref = input.value();
        let src = src_ref.read().expect("value lock poisoned");
        self.ensure_output_extent(src.rows() * repeat, src.cols());
        let cols = frame.columns(self.num_parallel_sequences(), src.cols())?;
        let mut dst = self.own_value.write().expect("value lock poisoned");
        dst.repeat_rows_from(&src, repeat, cols)
    }

    pub(crate) fn backprop_row_repeat(&self, repeat: usize, frame: &FrameRange) -> Result<()> {
        if self.is_noop() {
            return Ok(());
        }
        let input = self.single_input()?;
        let grad = self.own_grad.read().expect("gradient lock poisoned");
        let cols = frame.columns(self.num_parallel_sequences(), grad.cols())?;
        let dst_ref = input.gradient();
        let mut dst = dst_ref.write().expect("gradient lock poisoned");
        dst.add_folded_rows(&grad, repeat, cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeRef, SourceNode};
    use std::sync::Arc;
    use stoat_core::Mat;

    #[test]
    fn test_repeat_stacks_whole_copies() {
        let src = SourceNode::new("src", 2, 2);
        src.load_minibatch(Mat::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap())
            .unwrap();
        let node = TransformNode::row_repeat("rep", 3, Arc::clone(&src) as NodeRef<f64>);
        node.validate(true).unwrap();
        node.evaluate(&FrameRange::All).unwrap();

        let out = node.value();
        let out = out.read().unwrap();
        assert_eq!(out.rows(), 6);
        for rep in 0..3 {
            assert_eq!(out.at(rep * 2, 0), 1.0);
            assert_eq!(out.at(rep * 2, 1), 2.0);
            assert_eq!(out.at(rep * 2 + 1, 0), 3.0);
            assert_eq!(out.at(rep * 2 + 1, 1), 4.0);
        }
    }

    #[test]
    fn test_repeat_gradient_folds_copies() {
        let src = SourceNode::<f64>::new("src", 2, 1);
        let node = TransformNode::row_repeat("rep", 3, Arc::clone(&src) as NodeRef<f64>);
        node.validate(true).unwrap();
        {
            let mut g = node.own_grad.write().unwrap();
            *g = Mat::from_vec(6, 1, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        }
        node.backpropagate(0, &FrameRange::All).unwrap();

        let g = src.gradient();
        let g = g.read().unwrap();
        assert_eq!(g.at(0, 0), 1.0 + 3.0 + 5.0);
        assert_eq!(g.at(1, 0), 2.0 + 4.0 + 6.0);
    }

    #[test]
    fn test_repeat_of_one_aliases() {
        let src = SourceNode::<f64>::new("src", 2, 2);
        let node = TransformNode::row_repeat("rep", 1, Arc::clone(&src) as NodeRef<f64>);
        node.validate(true).unwrap();
        assert!(Arc::ptr_eq(&node.value(), &src.value()));
        assert!(Arc::ptr_eq(&node.gradient(), &src.gradient()));
    }

    #[test]
    fn test_zero_repeat_rejected_at_final() {
        let src: NodeRef<f64> = SourceNode::new("src", 2, 2);
        let node = TransformNode::row_repeat("rep", 0, src);
        assert!(node.validate(false).is_ok());
        assert!(matches!(
            node.validate(true).unwrap_err(),
            Error::InvalidRepeatCount { .. }
        ));
    }
}
