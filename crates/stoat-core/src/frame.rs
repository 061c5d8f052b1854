use std::ops::Range;

use crate::error::{Error, Result};

// FrameRange — which columns of a minibatch an operation touches
//
// Graph passes either sweep the whole minibatch or a single time step
// (optionally narrowed to one sequence slot). Because sequences are
// interleaved within a time step (column = t * S + s), both cases resolve
// to a contiguous column range of the value buffer.

/// The column sub-range a forward or gradient pass operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameRange {
    /// Every column of the minibatch.
    #[default]
    All,
    /// One time step; all sequence slots unless `seq` narrows it to one.
    Frame { time: usize, seq: Option<usize> },
}

impl FrameRange {
    /// A single time step across all sequence slots.
    pub fn frame(time: usize) -> Self {
        FrameRange::Frame { time, seq: None }
    }

    /// A single (sequence slot, time step) column.
    pub fn sequence_frame(time: usize, seq: usize) -> Self {
        FrameRange::Frame {
            time,
            seq: Some(seq),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, FrameRange::All)
    }

    /// Resolve to a contiguous column range of a buffer with the given
    /// number of parallel sequences and total columns.
    ///
    /// With no layout, callers pass `num_seqs = 1` so a frame is one column.
    pub fn columns(&self, num_seqs: usize, total_cols: usize) -> Result<Range<usize>> {
        match *self {
            FrameRange::All => Ok(0..total_cols),
            FrameRange::Frame { time, seq } => {
                let start = match seq {
                    None => time * num_seqs,
                    Some(s) => {
                        if s >= num_seqs {
                            return Err(Error::LayoutIndexOutOfBounds {
                                seq: s,
                                time,
                                num_seqs,
                                num_steps: total_cols / num_seqs.max(1),
                            });
                        }
                        time * num_seqs + s
                    }
                };
                let len = if seq.is_some() { 1 } else { num_seqs };
                if start + len > total_cols {
                    return Err(Error::ColumnRangeOutOfBounds {
                        start,
                        end: start + len,
                        cols: total_cols,
                    });
                }
                Ok(start..start + len)
            }
        }
    }
}
