//! Status-code entry points for callers that hand over fixed-size output
//! buffers and expect a byte count back, with `0` meaning failure.
//!
//! This is the only place that speaks this convention. Everything here is a
//! thin wrapper over [`CascadeEngine`]; errors are logged and flattened.

use log::warn;

use crate::dtype::ElementTypeTag;
use crate::engine::{split_buffer, CascadeEngine};

/// Compress `src` into caller-owned targets. Returns the bytes written to
/// each target; all zeros when the cascade could not be built.
pub fn zip_cascade(
    engine: &CascadeEngine,
    levels: &[i32],
    src: &[u8],
    targets: &mut [&mut [u8]],
    datatype: i32,
) -> Vec<usize> {
    let mut written = vec![0; targets.len()];
    let tag = match ElementTypeTag::from_raw(datatype) {
        Ok(tag) => tag,
        Err(e) => {
            warn!("zip_cascade: {e}");
            return written;
        }
    };
    let capacities: Vec<usize> = targets.iter().map(|t| t.len()).collect();
    let buffers = match engine.cascade_compress(levels, false, src, tag, &capacities) {
        Ok(buffers) => buffers,
        Err(e) => {
            warn!("zip_cascade: {e}");
            return written;
        }
    };
    for ((target, buf), n) in targets.iter_mut().zip(&buffers).zip(written.iter_mut()) {
        target[..buf.len()].copy_from_slice(buf.as_bytes());
        *n = buf.len();
    }
    written
}

/// Single-buffer variant of [`zip_cascade`].
pub fn zip(engine: &CascadeEngine, level: i32, src: &[u8], target: &mut [u8], datatype: i32) -> usize {
    zip_cascade(engine, &[level], src, &mut [target], datatype)
        .first()
        .copied()
        .unwrap_or(0)
}

/// Decompress a cascade prefix into `target`. Returns the bytes written, or
/// `0` on any failure.
pub fn unzip_cascade(engine: &CascadeEngine, srcs: &[&[u8]], target: &mut [u8]) -> usize {
    let Some(first) = srcs.first() else {
        return 0;
    };
    let result = split_buffer(first)
        .and_then(|(header, _)| ElementTypeTag::try_from(header.datatype))
        .and_then(|tag| engine.cascade_decompress(srcs, tag, target.len()));
    match result {
        Ok(out) => {
            target[..out.len()].copy_from_slice(&out);
            out.len()
        }
        Err(e) => {
            warn!("unzip_cascade: {e}");
            0
        }
    }
}

/// `(compressed size including header, decompressed size)` of a buffer, or
/// `None` if the header is not recognised.
pub fn unzip_header(src: &[u8]) -> Option<(usize, usize)> {
    let header = crate::format::CascadeHeader::decode(src).ok()?;
    Some((header.header_size() + header.compressed_len, header.original_len))
}
