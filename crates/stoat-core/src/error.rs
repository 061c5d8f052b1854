/// All errors that can occur within stoat.
///
/// This enum captures every failure mode: bad static configuration caught
/// at final validation, shape disagreements between graph neighbors,
/// deliberately unimplemented paths, sequence-boundary consistency
/// violations found at evaluation time, and buffer-level index errors.
/// Using a single error type across the workspace simplifies propagation;
/// every failure aborts the current graph evaluation — retries, if any,
/// belong to the training loop above this layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reshape target row count is neither a multiple nor a divisor of the
    /// input row count. Raised at final validation only.
    #[error("{node}: output row dimension {target_rows} is not an integer multiple or divisor of input dimension {input_rows}")]
    InvalidReshapeFactor {
        node: String,
        target_rows: usize,
        input_rows: usize,
    },

    /// RowRepeat configured with a repeat count of zero.
    #[error("{node}: repeat count must be at least 1")]
    InvalidRepeatCount { node: String },

    /// RowSlice range exceeds the input's row count. Final validation only.
    #[error("{node}: slice rows [{start}, {start}+{num_rows}) exceed the {input_rows} rows of the input")]
    SliceOutOfRange {
        node: String,
        start: usize,
        num_rows: usize,
        input_rows: usize,
    },

    /// RowStack inputs disagree on column count. Names the offending input.
    #[error("{node}: input {input} has {got} columns, expected {expected}")]
    ColumnCountMismatch {
        node: String,
        input: String,
        expected: usize,
        got: usize,
    },

    /// A sequence boundary flag sits inside (not at the edge of) a group of
    /// time steps being fused. Raised during layout derivation.
    #[error("{node}: found {flag} inside (not at the boundary of) the group being fused, at sequence {seq}, time {time}")]
    MisalignedSequenceFlag {
        node: String,
        seq: usize,
        time: usize,
        flag: &'static str,
    },

    /// A code path that fails fast instead of producing silently wrong numbers.
    #[error("{node}: {what} is not implemented")]
    NotImplemented { node: String, what: &'static str },

    /// Evaluate or backpropagate called before final validation succeeded.
    #[error("{node}: node has not passed final validation")]
    NotReady { node: String },

    /// A transform is missing the inputs it requires.
    #[error("{node}: expected at least {expected} input(s), got {got}")]
    MissingInput {
        node: String,
        expected: usize,
        got: usize,
    },

    /// Backpropagate called with an input index the node does not have.
    #[error("{node}: input index {index} out of range for {num_inputs} input(s)")]
    InputIndexOutOfRange {
        node: String,
        index: usize,
        num_inputs: usize,
    },

    /// Element count mismatch when creating or reshaping a buffer.
    #[error("element count mismatch: {rows}x{cols} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        rows: usize,
        cols: usize,
        expected: usize,
        got: usize,
    },

    /// A row range does not fit inside the buffer.
    #[error("row range [{start}, {start}+{count}) out of bounds for {rows} rows")]
    RowRangeOutOfBounds {
        start: usize,
        count: usize,
        rows: usize,
    },

    /// A column range does not fit inside the buffer.
    #[error("column range [{start}, {end}) out of bounds for {cols} columns")]
    ColumnRangeOutOfBounds {
        start: usize,
        end: usize,
        cols: usize,
    },

    /// The (D, S, M, K, T) dimensions handed to the shuffle primitive do not
    /// match the participating buffers.
    #[error("shuffle dims D={d} S={s} M={m} K={k} T={t} do not match source {src_rows}x{src_cols} / destination {dst_rows}x{dst_cols}")]
    ShuffleDimsMismatch {
        d: usize,
        s: usize,
        m: usize,
        k: usize,
        t: usize,
        src_rows: usize,
        src_cols: usize,
        dst_rows: usize,
        dst_cols: usize,
    },

    /// A (sequence, time) coordinate outside the layout's extent.
    #[error("layout coordinate (seq {seq}, time {time}) out of bounds for {num_seqs} sequence(s) x {num_steps} step(s)")]
    LayoutIndexOutOfBounds {
        seq: usize,
        time: usize,
        num_seqs: usize,
        num_steps: usize,
    },

    /// A persisted model fragment was written by a newer version.
    #[error("unsupported model version {got}, this build reads up to {supported}")]
    UnsupportedModelVersion { got: u32, supported: u32 },

    /// A persisted transform tag this build does not know.
    #[error("unknown transform tag {tag} in model fragment")]
    UnknownTransformTag { tag: u8 },

    /// I/O failure while reading or writing a model fragment.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
