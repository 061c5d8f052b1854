use std::fmt;
use std::ops::{Add, AddAssign, Mul};

// DType — supported element types
//
// Every buffer is instantiated for one element type. Minibatch data is
// single or double precision; there are no integer or half-precision
// buffers in this system, so the set stays small.

/// Enum of the supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Trait implemented by Rust types that can be stored in a [`crate::Mat`].
///
/// Provides the mapping between the concrete Rust type and the [`DType`]
/// enum, plus the conversions and arithmetic the buffer operations need.
pub trait Elem:
    Copy
    + Send
    + Sync
    + 'static
    + fmt::Debug
    + PartialEq
    + num_traits::NumCast
    + Add<Output = Self>
    + AddAssign
    + Mul<Output = Self>
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64 (for generic numeric code).
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;

    /// The zero value (additive identity, also the keep-weight that discards).
    fn zero() -> Self {
        Self::from_f64(0.0)
    }

    /// The one value (multiplicative identity).
    fn one() -> Self {
        Self::from_f64(1.0)
    }
}

impl Elem for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl Elem for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}
