use std::sync::{Arc, RwLock};

use stoat_core::{Elem, Error, FrameRange, MbLayout, PackingFlags, Result, StackDims};

use crate::node::{ComputationNode, LayoutRef};
use crate::transform::TransformNode;

// Reshape — reinterpret the input as `target_rows` rows
//
// Three very different regimes hide behind one configuration:
//
//  * `target_rows == rows`: pure alias, no data motion at all.
//  * No input layout: flat reinterpretation of the whole buffer, the
//    sample traversal order within a column preserved.
//  * Input layout present: the row change trades against the time axis.
//    Growing rows by a factor K fuses K consecutive time steps of each
//    sequence into one (feature blocks stacked top to bottom); shrinking
//    would split steps, which is deliberately left unimplemented rather
//    than risking silently wrong sequence bookkeeping.

impl<T: Elem> TransformNode<T> {
    pub(crate) fn validate_reshape(&self, target_rows: usize, is_final: bool) -> Result<()> {
        let input = self.single_input()?;
        let input_rows = input.rows();
        let input_cols = input.cols();

        if target_rows == 0 {
            if is_final {
                return Err(Error::InvalidReshapeFactor {
                    node: self.node_name(),
                    target_rows,
                    input_rows,
                });
            }
            return Ok(());
        }

        // Dimensions may still be settling on non-final passes.
        if is_final
            && input_rows > 0
            && input_rows % target_rows != 0
            && target_rows % input_rows != 0
        {
            return Err(Error::InvalidReshapeFactor {
                node: self.node_name(),
                target_rows,
                input_rows,
            });
        }

        let elems = input_rows * input_cols;
        if is_final && elems % target_rows != 0 {
            return Err(Error::msg(format!(
                "{}: input is {}x{} ({} elements), which does not divide into {} rows",
                self.node_name(),
                input_rows,
                input_cols,
                elems,
                target_rows
            )));
        }
        self.resize_output(target_rows, elems / target_rows);

        if !input.has_layout() {
            self.set_layout(LayoutRef::None);
        } else if input_rows == target_rows {
            self.set_layout(input.layout().inherit());
        } else if self.owned_layout_handle().is_none() {
            // Allocated once; begin_minibatch re-derives its contents.
            self.set_layout(LayoutRef::Owned(Arc::new(RwLock::new(MbLayout::new()))));
        }
        Ok(())
    }

    /// Derive the owned layout for a new minibatch: `K = target / rows`
    /// consecutive input steps fuse into one output step per sequence,
    /// with boundary flags checked for alignment against the grouping.
    pub(crate) fn begin_minibatch_reshape(&self, target_rows: usize) -> Result<()> {
        let own = match self.owned_layout_handle() {
            Some(h) => h,
            None => return Ok(()),
        };
        let input = self.single_input()?;
        let input_rows = input.rows();
        if input_rows == 0 {
            return Err(Error::msg(format!(
                "{}: input has no rows",
                self.node_name()
            )));
        }
        if target_rows < input_rows {
            return Err(self.err_not_implemented("unstacking time steps"));
        }
        let factor = target_rows / input_rows;
        let src_handle = match input.layout().handle().cloned() {
            Some(h) => h,
            None => {
                return Err(Error::msg(format!(
                    "{}: input no longer carries a layout",
                    self.node_name()
                )))
            }
        };
        let src = src_handle.read().expect("layout lock poisoned");
        let s = src.num_parallel_sequences();
        let t_in = src.num_time_steps();
        if factor == 0 || t_in % factor != 0 {
            return Err(Error::msg(format!(
                "{}: {} time step(s) cannot be fused in groups of {}",
                self.node_name(),
                t_in,
                factor
            )));
        }
        let t_out = t_in / factor;
        let mut dst = own.write().expect("layout lock poisoned");
        dst.init(s, t_out);
        for ss in 0..s {
            for tt in 0..t_out {
                let mut combined = PackingFlags::NONE;
                let mut gaps = 0;
                for sub in 0..factor {
                    let time = tt * factor + sub;
                    let f = src.get(ss, time)?;
                    if f.contains(PackingFlags::SEQUENCE_START) && sub != 0 {
                        return Err(Error::MisalignedSequenceFlag {
                            node: self.node_name(),
                            seq: ss,
                            time,
                            flag: "SequenceStart",
                        });
                    }
                    if f.contains(PackingFlags::SEQUENCE_END) && sub != factor - 1 {
                        return Err(Error::MisalignedSequenceFlag {
                            node: self.node_name(),
                            seq: ss,
                            time,
                            flag: "SequenceEnd",
                        });
                    }
                    if f.contains(PackingFlags::GAP) {
                        gaps += 1;
                    }
                    combined |= f;
                }
                // A gap on some but not all fused steps would merge real
                // frames with padding.
                if gaps > 0 && gaps < factor {
                    return Err(Error::MisalignedSequenceFlag {
                        node: self.node_name(),
                        seq: ss,
                        time: tt * factor,
                        flag: "Gap",
                    });
                }
                if !combined.is_none() {
                    dst.set(ss, tt, combined)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn evaluate_reshape(&self, target_rows: usize, frame: &FrameRange) -> Result<()> {
        if self.is_noop() {
            return Ok(());
        }
        let input = self.single_input()?;
        let src_ref = input.value();
        let src = src_ref.read().expect("value lock poisoned");
        let input_rows = src.rows();

        if !input.has_layout() {
            // Flat reinterpretation: sample j of a logical column-first
            // traversal lands at (j % target_rows, j / target_rows).
            let new_cols = src.elem_count() / target_rows;
            self.ensure_output_extent(target_rows, new_cols);
            let mut dst = self.own_value.write().expect("value lock poisoned");
            let cols = frame.columns(1, new_cols)?;
            for c in cols {
                for r in 0..target_rows {
                    let j = c * target_rows + r;
                    *dst.at_mut(r, c) = src.at(j % input_rows, j / input_rows);
                }
            }
            return Ok(());
        }

        if target_rows < input_rows {
            return Err(self.err_not_implemented("unstacking time steps"));
        }
        if input_rows == 0 {
            return Ok(());
        }

        let factor = target_rows / input_rows;
        let (s, t_out) = {
            let own = match self.owned_layout_handle() {
                Some(h) => h,
                None => {
                    return Err(Error::msg(format!(
                        "{}: layout was not derived for this minibatch",
                        self.node_name()
                    )))
                }
            };
            let l = own.read().expect("layout lock poisoned");
            (l.num_parallel_sequences(), l.num_time_steps())
        };
        self.ensure_output_extent(target_rows, s * t_out);
        let mut dst = self.own_value.write().expect("value lock poisoned");
        if frame.is_all() {
            dst.shuffle_scale_add(
                T::zero(),
                &src,
                StackDims {
                    d: input_rows,
                    s,
                    m: 1,
                    k: factor,
                    t: t_out,
                },
                T::one(),
            )
        } else {
            // Partial frame: direct copy of the addressed output columns.
            let cols = frame.columns(s, s * t_out)?;
            for c in cols {
                let tt = c / s;
                let ss = c % s;
                for sub in 0..factor {
                    for r in 0..input_rows {
                        *dst.at_mut(sub * input_rows + r, c) =
                            src.at(r, (tt * factor + sub) * s + ss);
                    }
                }
            }
            Ok(())
        }
    }

    pub(crate) fn backprop_reshape(&self, _target_rows: usize, _frame: &FrameRange) -> Result<()> {
        // The alias path needs no work at all: consumers already wrote
        // into the input's gradient buffer.
        if self.is_noop() {
            return Ok(());
        }
        Err(self.err_not_implemented("reshape gradient"))
    }
}
