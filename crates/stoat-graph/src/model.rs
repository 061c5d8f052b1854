// Model fragments — persisted transform configuration
//
// Per-node binary fragment, little-endian:
//
//   tag: u8              (1=Reshape, 2=RowSlice, 3=RowStack, 4=RowRepeat)
//   Reshape:   target_rows, width, height, channels   (u64 LE each)
//   RowSlice:  start, num_rows                        (u64 LE each)
//   RowRepeat: repeat                                 (u64 LE)
//   RowStack:  nothing — its offsets are derived from the inputs' row
//              counts at validation time and must not be trusted from disk.
//
// The outer model file (framing, node names, version header) is written
// by the surrounding toolchain; fragments only see their own scalars plus
// the file-level version number, which gates reading.

use std::io::{Read, Write};

use stoat_core::{Error, Result};

use crate::hints::ImageHints;
use crate::transform::Transform;

/// Highest fragment layout this build writes and reads.
pub const MODEL_VERSION: u32 = 1;

const TAG_RESHAPE: u8 = 1;
const TAG_ROW_SLICE: u8 = 2;
const TAG_ROW_STACK: u8 = 3;
const TAG_ROW_REPEAT: u8 = 4;

fn write_u8<W: Write>(w: &mut W, v: u8) -> Result<()> {
    w.write_all(&[v])?;
    Ok(())
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub fn save_transform<W: Write>(w: &mut W, kind: &Transform) -> Result<()> {
    match kind {
        Transform::Reshape { target_rows, hints } => {
            write_u8(w, TAG_RESHAPE)?;
            write_u64(w, *target_rows as u64)?;
            write_u64(w, hints.width as u64)?;
            write_u64(w, hints.height as u64)?;
            write_u64(w, hints.channels as u64)?;
        }
        Transform::RowSlice { start, num_rows } => {
            write_u8(w, TAG_ROW_SLICE)?;
            write_u64(w, *start as u64)?;
            write_u64(w, *num_rows as u64)?;
        }
        Transform::RowStack { .. } => {
            write_u8(w, TAG_ROW_STACK)?;
        }
        Transform::RowRepeat { repeat } => {
            write_u8(w, TAG_ROW_REPEAT)?;
            write_u64(w, *repeat as u64)?;
        }
    }
    Ok(())
}

pub fn load_transform<R: Read>(r: &mut R, model_version: u32) -> Result<Transform> {
    if model_version > MODEL_VERSION {
        return Err(Error::UnsupportedModelVersion {
            got: model_version,
            supported: MODEL_VERSION,
        });
    }
    let tag = read_u8(r)?;
    match tag {
        TAG_RESHAPE => {
            let target_rows = read_u64(r)? as usize;
            let width = read_u64(r)? as usize;
            let height = read_u64(r)? as usize;
            let channels = read_u64(r)? as usize;
            Ok(Transform::Reshape {
                target_rows,
                hints: ImageHints::new(width, height, channels),
            })
        }
        TAG_ROW_SLICE => {
            let start = read_u64(r)? as usize;
            let num_rows = read_u64(r)? as usize;
            Ok(Transform::RowSlice { start, num_rows })
        }
        TAG_ROW_STACK => Ok(Transform::RowStack {
            offsets: Vec::new(),
        }),
        TAG_ROW_REPEAT => {
            let repeat = read_u64(r)? as usize;
            Ok(Transform::RowRepeat { repeat })
        }
        _ => Err(Error::UnknownTransformTag { tag }),
    }
}
