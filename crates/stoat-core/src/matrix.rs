use std::ops::Range;

use rayon::prelude::*;

use crate::elem::Elem;
use crate::error::{Error, Result};

// Mat — row-major 2-D numeric buffer
//
// A Mat is the value (or gradient) of one graph node: `rows` is the
// per-sample feature dimension, `cols` the number of samples. When a
// minibatch layout applies, cols = parallel_sequences * time_steps and
// column `t * S + s` holds time step t of sequence slot s (sequences are
// interleaved within a time step).
//
// Reshape-only view changes never touch the data: `rows * cols` stays
// constant and only the interpretation of the flat storage changes. The
// one operation that genuinely shuffles data is `shuffle_scale_add`, the
// (D, S, M, K, T) -> (D, K, M, S, T) index permutation used to fuse K
// consecutive time steps of each sequence into one taller step.

/// Logical 5-D dimensions handed to [`Mat::shuffle_scale_add`].
///
/// `d` = feature dimension, `k` = stacking factor, `t` = target time
/// steps, `s` = parallel sequences, `m` = 1 (placeholder axis kept for
/// generality of the primitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackDims {
    pub d: usize,
    pub s: usize,
    pub m: usize,
    pub k: usize,
    pub t: usize,
}

impl StackDims {
    /// Total element count of the logical tensor.
    pub fn elem_count(&self) -> usize {
        self.d * self.s * self.m * self.k * self.t
    }
}

/// A row-major 2-D buffer of numeric elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Mat<T: Elem> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Elem> Mat<T> {
    /// Allocate a zero-filled buffer.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Mat {
            rows,
            cols,
            data: vec![T::zero(); rows * cols],
        }
    }

    /// Create a buffer from flat row-major data.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(Error::ElementCountMismatch {
                rows,
                cols,
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Mat { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements.
    pub fn elem_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The flat row-major storage.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Element at (row, col).
    ///
    /// # Panics
    /// Panics when the coordinate is out of bounds.
    pub fn at(&self, row: usize, col: usize) -> T {
        assert!(row < self.rows && col < self.cols, "index out of bounds");
        self.data[row * self.cols + col]
    }

    /// Mutable element at (row, col).
    ///
    /// # Panics
    /// Panics when the coordinate is out of bounds.
    pub fn at_mut(&mut self, row: usize, col: usize) -> &mut T {
        assert!(row < self.rows && col < self.cols, "index out of bounds");
        &mut self.data[row * self.cols + col]
    }

    /// Set every element to `v`.
    pub fn fill(&mut self, v: T) {
        for x in self.data.iter_mut() {
            *x = v;
        }
    }

    /// Reallocate to a new extent, zero-filling the contents.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.data.clear();
        self.data.resize(rows * cols, T::zero());
    }

    /// Reinterpret the same flat data under new dimensions. No copy; fails
    /// unless `rows * cols` is unchanged.
    pub fn reshape(&mut self, rows: usize, cols: usize) -> Result<()> {
        if rows * cols != self.data.len() {
            return Err(Error::ElementCountMismatch {
                rows,
                cols,
                expected: rows * cols,
                got: self.data.len(),
            });
        }
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }

    /// A contiguous view of rows `[start, start + count)`.
    ///
    /// Row ranges are contiguous in row-major storage, so this is a plain
    /// slice borrow.
    pub fn row_slice(&self, start: usize, count: usize) -> Result<&[T]> {
        self.check_row_range(start, count)?;
        Ok(&self.data[start * self.cols..(start + count) * self.cols])
    }

    /// Mutable contiguous view of rows `[start, start + count)`.
    pub fn row_slice_mut(&mut self, start: usize, count: usize) -> Result<&mut [T]> {
        self.check_row_range(start, count)?;
        let cols = self.cols;
        Ok(&mut self.data[start * cols..(start + count) * cols])
    }

    fn check_row_range(&self, start: usize, count: usize) -> Result<()> {
        if start + count > self.rows {
            return Err(Error::RowRangeOutOfBounds {
                start,
                count,
                rows: self.rows,
            });
        }
        Ok(())
    }

    fn check_col_range(&self, cols: &Range<usize>) -> Result<()> {
        if cols.start > cols.end || cols.end > self.cols {
            return Err(Error::ColumnRangeOutOfBounds {
                start: cols.start,
                end: cols.end,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Assign a row block from `src`, restricted to a column range:
    /// `self[dst_row + r, c] = src[src_row + r, c]` for `r < num_rows`,
    /// `c` in `cols`.
    pub fn copy_rows(
        &mut self,
        src: &Mat<T>,
        src_row: usize,
        dst_row: usize,
        num_rows: usize,
        cols: Range<usize>,
    ) -> Result<()> {
        src.check_row_range(src_row, num_rows)?;
        self.check_row_range(dst_row, num_rows)?;
        src.check_col_range(&cols)?;
        self.check_col_range(&cols)?;
        for r in 0..num_rows {
            let s0 = (src_row + r) * src.cols;
            let d0 = (dst_row + r) * self.cols;
            self.data[d0 + cols.start..d0 + cols.end]
                .copy_from_slice(&src.data[s0 + cols.start..s0 + cols.end]);
        }
        Ok(())
    }

    /// Accumulate a row block from `src` (add, never overwrite):
    /// `self[dst_row + r, c] += src[src_row + r, c]`.
    pub fn add_rows(
        &mut self,
        src: &Mat<T>,
        src_row: usize,
        dst_row: usize,
        num_rows: usize,
        cols: Range<usize>,
    ) -> Result<()> {
        src.check_row_range(src_row, num_rows)?;
        self.check_row_range(dst_row, num_rows)?;
        src.check_col_range(&cols)?;
        self.check_col_range(&cols)?;
        for r in 0..num_rows {
            let s0 = (src_row + r) * src.cols;
            let d0 = (dst_row + r) * self.cols;
            for c in cols.clone() {
                self.data[d0 + c] += src.data[s0 + c];
            }
        }
        Ok(())
    }

    /// Assign `repeat` stacked copies of the whole of `src` over a column
    /// range: `self[rep * src.rows + r, c] = src[r, c]`.
    pub fn repeat_rows_from(&mut self, src: &Mat<T>, repeat: usize, cols: Range<usize>) -> Result<()> {
        if self.rows != src.rows * repeat {
            return Err(Error::RowRangeOutOfBounds {
                start: 0,
                count: src.rows * repeat,
                rows: self.rows,
            });
        }
        for rep in 0..repeat {
            self.copy_rows(src, 0, rep * src.rows, src.rows, cols.clone())?;
        }
        Ok(())
    }

    /// Fold `repeat` stacked copies in `src` back into this buffer,
    /// accumulating: `self[r, c] += sum over rep of src[rep * self.rows + r, c]`.
    pub fn add_folded_rows(&mut self, src: &Mat<T>, repeat: usize, cols: Range<usize>) -> Result<()> {
        if src.rows != self.rows * repeat {
            return Err(Error::RowRangeOutOfBounds {
                start: 0,
                count: self.rows * repeat,
                rows: src.rows,
            });
        }
        for rep in 0..repeat {
            self.add_rows(src, rep * self.rows, 0, self.rows, cols.clone())?;
        }
        Ok(())
    }

    /// The tensor-shuffle-scale-add primitive:
    /// `self = keep * self + scale * shuffle(src)`.
    ///
    /// `src` is read as the logical tensor `(D, S, M, K, T)` — it must be
    /// `d x (s*m*k*t)` with column index `ss + S*(mm + M*(kk + K*tt))` —
    /// and `self` as `(D, K, M, S, T)` — it must be `(d*k*m) x (s*t)` with
    /// row index `dd + D*(kk + K*mm)` and column index `ss + S*tt`.
    ///
    /// In minibatch terms: output time step `tt` of sequence `ss` is built
    /// from the K consecutive input steps `tt*K .. tt*K+K` of the same
    /// sequence, feature blocks ordered block 0 .. block K-1 top to bottom.
    /// A pure index permutation; values are only scaled, never mixed.
    pub fn shuffle_scale_add(
        &mut self,
        keep: T,
        src: &Mat<T>,
        dims: StackDims,
        scale: T,
    ) -> Result<()> {
        let StackDims { d, s, m, k, t } = dims;
        let src_ok = src.rows == d && src.cols == s * m * k * t;
        let dst_ok = self.rows == d * k * m && self.cols == s * t;
        if !src_ok || !dst_ok {
            return Err(Error::ShuffleDimsMismatch {
                d,
                s,
                m,
                k,
                t,
                src_rows: src.rows,
                src_cols: src.cols,
                dst_rows: self.rows,
                dst_cols: self.cols,
            });
        }
        if self.data.is_empty() {
            return Ok(());
        }

        let dst_cols = self.cols;
        let src_cols = src.cols;
        let src_data = &src.data;
        self.data
            .par_chunks_mut(dst_cols)
            .enumerate()
            .for_each(|(row, out)| {
                let dd = row % d;
                let kk = (row / d) % k;
                let mm = row / (d * k);
                for tt in 0..t {
                    let src_col_base = s * (mm + m * (kk + k * tt));
                    for ss in 0..s {
                        let v = src_data[dd * src_cols + src_col_base + ss];
                        let slot = &mut out[ss + s * tt];
                        *slot = keep * *slot + scale * v;
                    }
                }
            });
        Ok(())
    }
}
