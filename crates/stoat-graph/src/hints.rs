// Image shape hints — diagnostic (width, height, channels) metadata
//
// Hints accompany each node's output for printing and for downstream
// nodes that care about spatial structure. They are best-effort only:
// row/column counts are authoritative, and a derivation that cannot be
// completed degrades to a default with a warning, never an error.

/// Optional (width, height, channels) metadata attached to a node output.
///
/// All-zero means unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHints {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl ImageHints {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        ImageHints {
            width,
            height,
            channels,
        }
    }

    pub fn elem_count(&self) -> usize {
        self.width * self.height * self.channels
    }

    pub fn is_unset(&self) -> bool {
        *self == ImageHints::default()
    }
}

/// Complete reshape hints against the target row count.
///
/// When exactly one of the three dimensions is missing and the other two
/// divide `target_rows` evenly, the third is derived. Inconsistent or
/// underspecified hints fall back to `(1, 1, target_rows)` with a warning;
/// so does plain inheritance when the input's hints describe anything
/// richer than a flat column (`width * channels != 1`), since that
/// structure cannot survive an arbitrary re-rowing.
pub(crate) fn infer_reshape_hints(
    requested: ImageHints,
    target_rows: usize,
    inherited: ImageHints,
    node: &str,
) -> ImageHints {
    let mut h = requested;
    if h.width > 0 && h.height > 0 && h.channels == 0 && target_rows % (h.width * h.height) == 0 {
        h.channels = target_rows / (h.width * h.height);
    } else if h.width > 0 && h.channels > 0 && h.height == 0
        && target_rows % (h.width * h.channels) == 0
    {
        h.height = target_rows / (h.width * h.channels);
    } else if h.height > 0 && h.channels > 0 && h.width == 0
        && target_rows % (h.height * h.channels) == 0
    {
        h.width = target_rows / (h.height * h.channels);
    }

    if h.width > 0 && h.height > 0 && h.channels > 0 {
        if h.elem_count() == target_rows {
            return h;
        }
        log::warn!(
            "{}: image hints {}x{}x{} do not cover {} output rows; falling back to (1, 1, {})",
            node,
            h.width,
            h.height,
            h.channels,
            target_rows,
            target_rows
        );
    } else if !requested.is_unset() {
        log::warn!(
            "{}: image hints {}x{}x{} are underspecified; falling back to (1, 1, {})",
            node,
            requested.width,
            requested.height,
            requested.channels,
            target_rows,
        );
    } else if inherited.width * inherited.channels != 1 {
        log::warn!(
            "{}: cannot inherit image hints from the input; hint information is lost",
            node
        );
    }
    ImageHints::new(1, 1, target_rows)
}

/// Hints for a transform that keeps columns but changes the row count
/// (RowSlice, RowStack): inherit width/channels, replace height with the
/// output row count. Inputs with real spatial structure lose it, which is
/// worth a warning but nothing more.
pub(crate) fn row_op_hints(
    inherited: ImageHints,
    out_rows: usize,
    op: &str,
    node: &str,
) -> ImageHints {
    if inherited.width * inherited.channels != 1 {
        log::warn!(
            "{}: {} cannot inherit image hints from its input; hint information is lost",
            node,
            op
        );
    }
    ImageHints {
        width: inherited.width.max(1),
        height: out_rows,
        channels: inherited.channels.max(1),
    }
}

/// Hints for RowRepeat: the height multiplies by the repeat count.
pub(crate) fn repeat_hints(
    inherited: ImageHints,
    repeat: usize,
    out_rows: usize,
    node: &str,
) -> ImageHints {
    if inherited.width * inherited.channels != 1 {
        log::warn!(
            "{}: RowRepeat cannot inherit image hints from its input; hint information is lost",
            node
        );
    }
    let height = if inherited.height > 0 {
        inherited.height * repeat
    } else {
        out_rows
    };
    ImageHints {
        width: inherited.width.max(1),
        height,
        channels: inherited.channels.max(1),
    }
}
