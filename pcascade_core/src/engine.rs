use log::debug;

use crate::codec::{CodecSet, FloatLayer};
use crate::dtype::{select_codec, CodecFamily, CodecSelection, ElementTypeTag};
use crate::error::{CascadeError, Result};
use crate::format::{
    current_format, CascadeHeader, Discriminator, HEADER_SIZE, LAYER_POSITION_SIZE, MAX_FIELD,
    RESIDUAL_FOLLOWS,
};

/// Float level codes are shifted by this much to obtain a sensitivity.
pub const SENSITIVITY_OFFSET: i32 = 61;

/// Highest float level code; maps to sensitivity 10.
pub const MAX_FLOAT_LEVEL: i32 = 71;

/// Sensitivity for a float level code: `[1, 71]` maps onto `[-60, 10]`.
#[inline]
pub fn sensitivity(level: u8) -> i32 {
    level as i32 - SENSITIVITY_OFFSET
}

/// Validate a float level code.
pub(crate) fn float_level(level: i32) -> Result<u8> {
    if !(1..=MAX_FLOAT_LEVEL).contains(&level) {
        return Err(CascadeError::InvalidLevel {
            level,
            reason: "float levels must lie in 1..=71",
        });
    }
    Ok(level as u8)
}

/// Validate a level code for the exact family, where it is only recorded.
pub(crate) fn exact_level(level: i32) -> Result<u8> {
    if !(0..RESIDUAL_FOLLOWS as i32).contains(&level) {
        return Err(CascadeError::InvalidLevel {
            level,
            reason: "level codes must fit in 7 bits",
        });
    }
    Ok(level as u8)
}

pub(crate) fn check_source(src: &[u8]) -> Result<()> {
    if src.len() > MAX_FIELD {
        return Err(CascadeError::OversizedSource(src.len()));
    }
    Ok(())
}

// ── Compressed buffer ──────────────────────────────────────────────────────

/// An owned `[header][payload]` buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBuffer {
    header: CascadeHeader,
    bytes: Vec<u8>,
}

impl CompressedBuffer {
    /// Prefix `payload` with a freshly encoded header.
    pub(crate) fn stamp(header: CascadeHeader, payload: &[u8]) -> Result<Self> {
        let encoded = header.encode()?;
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&encoded);
        bytes.extend_from_slice(payload);
        Ok(Self { header, bytes })
    }

    /// Adopt bytes read back from storage, validating the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = CascadeHeader::decode(&bytes)?;
        let end = header.header_size() + header.compressed_len;
        if bytes.len() < end {
            return Err(CascadeError::CorruptBuffer(format!(
                "header records {} payload bytes but only {} follow",
                header.compressed_len,
                bytes.len().saturating_sub(header.header_size())
            )));
        }
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &CascadeHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        let start = self.header.header_size();
        &self.bytes[start..start + self.header.compressed_len]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl AsRef<[u8]> for CompressedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Split raw bytes into a decoded header and the payload it describes.
pub(crate) fn split_buffer(buf: &[u8]) -> Result<(CascadeHeader, &[u8])> {
    let header = CascadeHeader::decode(buf)?;
    let start = header.header_size();
    let end = start + header.compressed_len;
    if buf.len() < end {
        return Err(CascadeError::CorruptBuffer(format!(
            "header records {} payload bytes but only {} follow",
            header.compressed_len,
            buf.len() - start
        )));
    }
    Ok((header, &buf[start..end]))
}

// ── Engine ─────────────────────────────────────────────────────────────────

/// Compresses and decompresses single buffers and whole cascades.
///
/// The engine holds no mutable state: every call owns its own staging
/// buffers, so one engine can be shared across worker threads.
#[derive(Debug, Clone)]
pub struct CascadeEngine {
    codecs: CodecSet,
}

impl CascadeEngine {
    pub fn new(codecs: CodecSet) -> Self {
        Self { codecs }
    }

    pub fn codecs(&self) -> &CodecSet {
        &self.codecs
    }

    /// Compress `src` into one buffer that must fit `target_capacity` bytes,
    /// header included.
    pub fn compress(
        &self,
        level: i32,
        tag: ElementTypeTag,
        src: &[u8],
        target_capacity: usize,
    ) -> Result<CompressedBuffer> {
        check_source(src)?;
        if target_capacity == 0 {
            return Err(CascadeError::InvalidCapacity(0));
        }
        let sel = select_codec(tag)?;
        sel.check_alignment(src.len())?;

        let (discriminator, payload) = match sel.family {
            CodecFamily::Float => {
                let level = float_level(level)?;
                let kind = float_kind(&sel)?;
                let payloads =
                    self.codecs
                        .float
                        .compress(kind, &[sensitivity(level)], false, src)?;
                if payloads.len() != 1 {
                    return Err(CascadeError::Codec(anyhow::anyhow!(
                        "{} returned {} layers for a single level",
                        self.codecs.float.name(),
                        payloads.len()
                    )));
                }
                (Discriminator::new(level, false), frame_layer(0, &payloads[0]))
            }
            CodecFamily::Exact => {
                let level = exact_level(level)?;
                let payload = self
                    .codecs
                    .exact
                    .compress(sel.element_size, sel.signed, src)?;
                (Discriminator::new(level, false), payload)
            }
        };

        let needed = payload.len() + HEADER_SIZE;
        if needed > target_capacity {
            debug!(
                "{} payload of {} bytes does not fit capacity {}",
                tag, payload.len(), target_capacity
            );
            return Err(CascadeError::CapacityExceeded {
                index: 0,
                needed,
                capacity: target_capacity,
            });
        }

        CompressedBuffer::stamp(
            CascadeHeader {
                version: current_format().version,
                discriminator,
                compressed_len: payload.len(),
                original_len: src.len(),
                datatype: tag as u8,
                buffer_count: 1,
            },
            &payload,
        )
    }

    /// Decompress one payload described by `header`.
    pub fn decompress(
        &self,
        header: &CascadeHeader,
        tag: ElementTypeTag,
        payload: &[u8],
        dest_capacity: usize,
    ) -> Result<Vec<u8>> {
        if header.datatype != tag as u8 {
            return Err(CascadeError::DatatypeMismatch {
                requested: tag as u8,
                recorded: header.datatype,
            });
        }
        let sel = select_codec(tag)?;
        if payload.len() < header.compressed_len {
            return Err(CascadeError::CorruptBuffer(format!(
                "payload has {} bytes, header records {}",
                payload.len(),
                header.compressed_len
            )));
        }
        let payload = &payload[..header.compressed_len];

        let out = match sel.family {
            CodecFamily::Float => {
                let layer = float_layer(header, payload)?;
                let produced = header.buffer_count as usize;
                if layer.position != 0 || (produced > 1 && !header.discriminator.residual_follows()) {
                    return Err(CascadeError::InsufficientPrecision {
                        supplied: 1,
                        produced: produced.max(layer.position + 1),
                    });
                }
                self.codecs
                    .float
                    .reconstruct(float_kind(&sel)?, &[layer], header.original_len)?
            }
            CodecFamily::Exact => self.codecs.exact.decompress(
                sel.element_size,
                sel.signed,
                payload,
                header.original_len,
            )?,
        };
        finish(&sel, header.original_len, out, dest_capacity)
    }

    /// Decompress a self-describing buffer using the datatype in its header.
    pub fn decompress_buffer(&self, buf: &[u8], dest_capacity: usize) -> Result<Vec<u8>> {
        let (header, payload) = split_buffer(buf)?;
        let tag = ElementTypeTag::try_from(header.datatype)?;
        self.decompress(&header, tag, payload, dest_capacity)
    }
}

pub(crate) fn float_kind(sel: &CodecSelection) -> Result<crate::dtype::FloatKind> {
    sel.float_kind()
        .ok_or(CascadeError::UnsupportedType(sel.tag as i32))
}

/// Prefix a transform payload with its cascade position.
pub(crate) fn frame_layer(position: u8, payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(LAYER_POSITION_SIZE + payload.len());
    framed.push(position);
    framed.extend_from_slice(payload);
    framed
}

/// Build the transform-facing view of one float buffer, stripping the
/// position byte.
pub(crate) fn float_layer<'a>(header: &CascadeHeader, payload: &'a [u8]) -> Result<FloatLayer<'a>> {
    if header.version != current_format().version {
        return Err(CascadeError::UndecodableFormat(header.version));
    }
    let (&position, payload) = payload.split_first().ok_or_else(|| {
        CascadeError::CorruptBuffer("float payload is missing its position byte".to_string())
    })?;
    let disc = header.discriminator;
    let sensitivity = if disc.is_residual() {
        None
    } else {
        Some(sensitivity(float_level(disc.level() as i32)?))
    };
    Ok(FloatLayer {
        position: position as usize,
        sensitivity,
        payload,
    })
}

/// Validate decoded bytes: whole elements, agreeing with the header, within
/// the destination capacity.
pub(crate) fn finish(
    sel: &CodecSelection,
    original_len: usize,
    out: Vec<u8>,
    dest_capacity: usize,
) -> Result<Vec<u8>> {
    if out.len() % sel.element_size != 0 {
        return Err(CascadeError::CorruptBuffer(format!(
            "decoded {} bytes, not a whole number of {}-byte elements",
            out.len(),
            sel.element_size
        )));
    }
    if out.len() != original_len {
        return Err(CascadeError::CorruptBuffer(format!(
            "decoded {} elements ({} bytes) but the header records {} bytes",
            out.len() / sel.element_size,
            out.len(),
            original_len
        )));
    }
    if out.len() > dest_capacity {
        return Err(CascadeError::CapacityExceeded {
            index: 0,
            needed: out.len(),
            capacity: dest_capacity,
        });
    }
    Ok(out)
}
