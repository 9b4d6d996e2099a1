//! Multi-buffer precision cascades.
//!
//! A cascade turns one numeric array into an ordered list of buffers of
//! increasing fidelity. Float arrays get one buffer per level code plus an
//! optional residual that makes the cascade bit-exact; integer arrays are
//! always lossless and produce a single buffer.
//!
//! # Buffer-count rules on read
//! Every header records how many buffers its cascade produced. A reader may
//! supply fewer only when the cascade carries a residual: the residual is
//! optional by construction, and any prefix of the level buffers decodes to
//! the precision of its last level. Without a residual every buffer is
//! mandatory, and a short read fails instead of returning a coarser array.

use log::{debug, warn};

use crate::codec::FloatLayer;
use crate::dtype::{select_codec, CodecFamily, ElementTypeTag};
use crate::engine::{
    check_source, finish, float_kind, float_layer, float_level, frame_layer, sensitivity,
    split_buffer, CascadeEngine, CompressedBuffer,
};
use crate::error::{CascadeError, Result};
use crate::format::{current_format, CascadeHeader, Discriminator, HEADER_SIZE, RESIDUAL_LEVEL};

/// The level list of one cascade call, with the residual sentinel resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeSpec {
    levels: Vec<i32>,
    has_residual: bool,
}

impl CascadeSpec {
    /// A trailing `0` level is the residual sentinel and is folded into
    /// `residual`. A `0` anywhere else is rejected.
    pub fn new(levels: &[i32], residual: bool) -> Result<Self> {
        let mut levels = levels.to_vec();
        let mut has_residual = residual;
        if levels.last() == Some(&(RESIDUAL_LEVEL as i32)) {
            levels.pop();
            has_residual = true;
        }
        if levels.contains(&(RESIDUAL_LEVEL as i32)) {
            return Err(CascadeError::InvalidLevel {
                level: 0,
                reason: "the residual sentinel may only appear last",
            });
        }
        if levels.is_empty() && !has_residual {
            return Err(CascadeError::InvalidLevel {
                level: 0,
                reason: "a cascade needs at least one level",
            });
        }
        Ok(Self {
            levels,
            has_residual,
        })
    }

    /// Level codes of the non-residual buffers, coarsest first.
    pub fn levels(&self) -> &[i32] {
        &self.levels
    }

    pub fn has_residual(&self) -> bool {
        self.has_residual
    }

    /// Buffers a float cascade produces for these levels.
    pub fn buffer_count(&self) -> usize {
        self.levels.len() + usize::from(self.has_residual)
    }
}

impl CascadeEngine {
    /// Compress `src` into a cascade, one buffer per entry of
    /// `target_capacities`.
    ///
    /// Either every buffer fits its target or the call fails and returns none.
    pub fn cascade_compress(
        &self,
        levels: &[i32],
        residual: bool,
        src: &[u8],
        tag: ElementTypeTag,
        target_capacities: &[usize],
    ) -> Result<Vec<CompressedBuffer>> {
        // ── Validate ────────────────────────────────────────────────────────
        check_source(src)?;
        if let Some(index) = target_capacities.iter().position(|&c| c == 0) {
            return Err(CascadeError::InvalidCapacity(index));
        }
        let sel = select_codec(tag)?;
        sel.check_alignment(src.len())?;
        let spec = CascadeSpec::new(levels, residual)?;

        // ── Plan ────────────────────────────────────────────────────────────
        if sel.family == CodecFamily::Exact {
            let capacity = *target_capacities.first().ok_or(CascadeError::TargetCountMismatch {
                expected: 1,
                actual: 0,
            })?;
            if target_capacities.len() > 1 {
                debug!(
                    "{} cascade collapses to one exact buffer; ignoring {} extra targets",
                    tag,
                    target_capacities.len() - 1
                );
            }
            let level = spec.levels().first().copied().unwrap_or(RESIDUAL_LEVEL as i32);
            return self.compress(level, tag, src, capacity).map(|b| vec![b]);
        }

        let codes = spec
            .levels()
            .iter()
            .map(|&l| float_level(l))
            .collect::<Result<Vec<u8>>>()?;
        let count = spec.buffer_count();
        if target_capacities.len() != count {
            return Err(CascadeError::TargetCountMismatch {
                expected: count,
                actual: target_capacities.len(),
            });
        }
        let buffer_count = u8::try_from(count).map_err(|_| CascadeError::InvalidLevel {
            level: count as i32,
            reason: "a cascade holds at most 255 buffers",
        })?;
        debug!(
            "cascade plan: {} levels {:?}, residual={}, {} source bytes",
            tag,
            codes,
            spec.has_residual(),
            src.len()
        );

        // ── Execute ─────────────────────────────────────────────────────────
        let kind = float_kind(&sel)?;
        let sensitivities: Vec<i32> = codes.iter().map(|&c| sensitivity(c)).collect();
        let payloads = self
            .codecs()
            .float
            .compress(kind, &sensitivities, spec.has_residual(), src)?;
        if payloads.len() != count {
            return Err(CascadeError::Codec(anyhow::anyhow!(
                "{} returned {} layers, expected {}",
                self.codecs().float.name(),
                payloads.len(),
                count
            )));
        }
        // Positions fit a byte: `count` was checked against u8 above.
        let payloads: Vec<Vec<u8>> = payloads
            .iter()
            .enumerate()
            .map(|(position, payload)| frame_layer(position as u8, payload))
            .collect();

        // ── Check every capacity before anything leaves this call ───────────
        for (index, (payload, &capacity)) in payloads.iter().zip(target_capacities).enumerate() {
            let needed = payload.len() + HEADER_SIZE;
            if needed > capacity {
                warn!(
                    "discarding {}-buffer cascade: buffer {} needs {} bytes, capacity {}",
                    count, index, needed, capacity
                );
                return Err(CascadeError::CapacityExceeded {
                    index,
                    needed,
                    capacity,
                });
            }
        }

        // ── Stamp headers ───────────────────────────────────────────────────
        let discriminators = codes
            .iter()
            .map(|&c| Discriminator::new(c, spec.has_residual()))
            .chain(spec.has_residual().then(Discriminator::residual));
        payloads
            .iter()
            .zip(discriminators)
            .map(|(payload, discriminator)| {
                CompressedBuffer::stamp(
                    CascadeHeader {
                        version: current_format().version,
                        discriminator,
                        compressed_len: payload.len(),
                        original_len: src.len(),
                        datatype: tag as u8,
                        buffer_count,
                    },
                    payload,
                )
            })
            .collect()
    }

    /// Reconstruct an array from a prefix of its cascade buffers, coarsest
    /// first.
    pub fn cascade_decompress<B: AsRef<[u8]>>(
        &self,
        buffers: &[B],
        tag: ElementTypeTag,
        dest_capacity: usize,
    ) -> Result<Vec<u8>> {
        let parsed = buffers
            .iter()
            .map(|b| split_buffer(b.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let Some((lead, _)) = parsed.first() else {
            return Err(CascadeError::InsufficientPrecision {
                supplied: 0,
                produced: 0,
            });
        };
        let lead = *lead;

        for (i, (h, _)) in parsed.iter().enumerate().skip(1) {
            if h.buffer_count != lead.buffer_count
                || h.datatype != lead.datatype
                || h.original_len != lead.original_len
            {
                return Err(CascadeError::InconsistentCascade(format!(
                    "buffer {i} records count {} datatype {} length {}, buffer 0 records {} {} {}",
                    h.buffer_count,
                    h.datatype,
                    h.original_len,
                    lead.buffer_count,
                    lead.datatype,
                    lead.original_len
                )));
            }
        }
        if lead.datatype != tag as u8 {
            return Err(CascadeError::DatatypeMismatch {
                requested: tag as u8,
                recorded: lead.datatype,
            });
        }
        let sel = select_codec(tag)?;

        let supplied = parsed.len();
        let produced = lead.buffer_count as usize;
        if supplied > produced {
            return Err(CascadeError::TooManyBuffers { supplied, produced });
        }
        if let Some(pos) = parsed[..supplied - 1]
            .iter()
            .position(|(h, _)| sel.family == CodecFamily::Float && h.discriminator.is_residual())
        {
            return Err(CascadeError::InconsistentCascade(format!(
                "residual buffer supplied at position {pos}, before the end of the cascade"
            )));
        }
        let layers = match sel.family {
            CodecFamily::Float => parsed
                .iter()
                .map(|(h, payload)| float_layer(h, payload))
                .collect::<Result<Vec<FloatLayer<'_>>>>()?,
            CodecFamily::Exact => Vec::new(),
        };
        for (i, layer) in layers.iter().enumerate() {
            if layer.position > i {
                debug!(
                    "buffer {} holds cascade position {}; earlier buffers are missing",
                    i, layer.position
                );
                return Err(CascadeError::InsufficientPrecision { supplied, produced });
            }
            if layer.position < i {
                return Err(CascadeError::InconsistentCascade(format!(
                    "buffer {i} holds cascade position {}, already supplied or out of order",
                    layer.position
                )));
            }
        }
        if supplied < produced {
            let last = parsed[supplied - 1].0.discriminator;
            if last.is_residual() || !last.residual_follows() {
                return Err(CascadeError::InsufficientPrecision { supplied, produced });
            }
            debug!(
                "decoding {} of {} buffers; residual omitted",
                supplied, produced
            );
        }

        let out = match sel.family {
            CodecFamily::Exact => {
                let (header, payload) = &parsed[0];
                self.codecs()
                    .exact
                    .decompress(sel.element_size, sel.signed, payload, lead.original_len)
                    .map_err(|e| {
                        CascadeError::Codec(e.context(format!(
                            "exact buffer of {} bytes",
                            header.compressed_len
                        )))
                    })?
            }
            CodecFamily::Float => self.codecs().float.reconstruct(
                float_kind(&sel)?,
                &layers,
                lead.original_len,
            )?,
        };
        finish(&sel, lead.original_len, out, dest_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RESIDUAL_FOLLOWS;
    use crate::testing::{f32_bytes, test_engine};

    fn ramp(n: usize) -> Vec<u8> {
        f32_bytes(&(0..n).map(|i| 1.0 + i as f32 * 0.173).collect::<Vec<_>>())
    }

    #[test]
    fn levels_fold_trailing_sentinel() {
        let spec = CascadeSpec::new(&[65, 67, 0], false).unwrap();
        assert_eq!(spec.levels(), &[65, 67]);
        assert!(spec.has_residual());
        assert_eq!(spec.buffer_count(), 3);

        let spec = CascadeSpec::new(&[65], true).unwrap();
        assert_eq!(spec.buffer_count(), 2);

        assert!(CascadeSpec::new(&[65, 0, 67], false).is_err());
        assert!(CascadeSpec::new(&[], false).is_err());
        assert_eq!(CascadeSpec::new(&[0], false).unwrap().buffer_count(), 1);
    }

    #[test]
    fn headers_share_count_and_datatype() {
        let engine = test_engine();
        let src = ramp(32);
        let bufs = engine
            .cascade_compress(&[65, 67, 0], false, &src, ElementTypeTag::F32, &[1024; 3])
            .unwrap();
        assert_eq!(bufs.len(), 3);
        for b in &bufs {
            assert_eq!(&b.as_bytes()[0..2], b"PC");
            assert_eq!(b.as_bytes()[9], ElementTypeTag::F32 as u8);
            assert_eq!(b.as_bytes()[10], 3);
        }
        assert_eq!(bufs[0].as_bytes()[2], 65 | RESIDUAL_FOLLOWS);
        assert_eq!(bufs[1].as_bytes()[2], 67 | RESIDUAL_FOLLOWS);
        assert_eq!(bufs[2].as_bytes()[2], 0);
    }

    #[test]
    fn full_cascade_is_exact_and_prefix_is_lossy() {
        let engine = test_engine();
        let src = ramp(50);
        let bufs = engine
            .cascade_compress(&[65, 67, 0], false, &src, ElementTypeTag::F32, &[4096; 3])
            .unwrap();
        let all = engine.cascade_decompress(&bufs, ElementTypeTag::F32, src.len()).unwrap();
        assert_eq!(all, src);

        let two = engine.cascade_decompress(&bufs[..2], ElementTypeTag::F32, src.len()).unwrap();
        for (o, r) in src.chunks_exact(4).zip(two.chunks_exact(4)) {
            let o = u32::from_le_bytes(o.try_into().unwrap());
            let r = u32::from_le_bytes(r.try_into().unwrap());
            // sensitivity 6 drops 4 low mantissa bits
            assert_eq!(r, o & !0xF);
        }
    }

    #[test]
    fn missing_level_buffer_without_residual_fails() {
        let engine = test_engine();
        let src = ramp(16);
        let bufs = engine
            .cascade_compress(&[65, 67], false, &src, ElementTypeTag::F32, &[4096; 2])
            .unwrap();
        assert!(matches!(
            engine.cascade_decompress(&bufs[..1], ElementTypeTag::F32, 4096),
            Err(CascadeError::InsufficientPrecision { supplied: 1, produced: 2 })
        ));
        assert_eq!(
            engine.cascade_decompress(&bufs, ElementTypeTag::F32, 4096).unwrap().len(),
            src.len()
        );
    }

    #[test]
    fn too_many_and_out_of_order_buffers() {
        let engine = test_engine();
        let src = ramp(16);
        let bufs = engine
            .cascade_compress(&[65, 0], false, &src, ElementTypeTag::F32, &[4096; 2])
            .unwrap();
        let extra = vec![bufs[0].clone(), bufs[1].clone(), bufs[1].clone()];
        assert!(matches!(
            engine.cascade_decompress(&extra, ElementTypeTag::F32, 4096),
            Err(CascadeError::TooManyBuffers { supplied: 3, produced: 2 })
        ));
        let swapped = vec![bufs[1].clone(), bufs[0].clone()];
        assert!(matches!(
            engine.cascade_decompress(&swapped, ElementTypeTag::F32, 4096),
            Err(CascadeError::InconsistentCascade(_))
        ));
        let empty: Vec<CompressedBuffer> = Vec::new();
        assert!(matches!(
            engine.cascade_decompress(&empty, ElementTypeTag::F32, 4096),
            Err(CascadeError::InsufficientPrecision { supplied: 0, .. })
        ));
    }

    #[test]
    fn buffers_must_form_a_true_prefix() {
        let engine = test_engine();
        let src = ramp(25);
        let bufs = engine
            .cascade_compress(&[65, 67, 0], false, &src, ElementTypeTag::F32, &[4096; 3])
            .unwrap();
        for (position, b) in bufs.iter().enumerate() {
            assert_eq!(b.payload()[0] as usize, position);
        }

        // Buffer 1 on its own skips the coarsest layer.
        assert!(matches!(
            engine.cascade_decompress(&bufs[1..2], ElementTypeTag::F32, 4096),
            Err(CascadeError::InsufficientPrecision { supplied: 1, produced: 3 })
        ));
        let repeated = vec![bufs[0].clone(), bufs[0].clone()];
        assert!(matches!(
            engine.cascade_decompress(&repeated, ElementTypeTag::F32, 4096),
            Err(CascadeError::InconsistentCascade(_))
        ));
        let skipped = vec![bufs[0].clone(), bufs[2].clone()];
        assert!(matches!(
            engine.cascade_decompress(&skipped, ElementTypeTag::F32, 4096),
            Err(CascadeError::InsufficientPrecision { .. })
        ));
        let reordered = vec![bufs[1].clone(), bufs[0].clone()];
        assert!(matches!(
            engine.cascade_decompress(&reordered, ElementTypeTag::F32, 4096),
            Err(CascadeError::InsufficientPrecision { .. })
        ));
    }

    #[test]
    fn decoded_size_is_bounded_by_the_header() {
        let engine = test_engine();
        let src = ramp(8);
        let bufs = engine
            .cascade_compress(&[65, 0], false, &src, ElementTypeTag::F32, &[4096; 2])
            .unwrap();
        let mut shrunk: Vec<Vec<u8>> = bufs.iter().map(|b| b.as_bytes().to_vec()).collect();
        for raw in shrunk.iter_mut() {
            let mut header = CascadeHeader::decode(raw).unwrap();
            header.original_len = 8;
            raw[..HEADER_SIZE].copy_from_slice(&header.encode().unwrap());
        }
        assert!(matches!(
            engine.cascade_decompress(&shrunk, ElementTypeTag::F32, 4096),
            Err(CascadeError::Codec(_))
        ));
    }

    #[test]
    fn one_short_capacity_discards_the_whole_cascade() {
        let engine = test_engine();
        let src = ramp(20);
        let fitted = engine
            .cascade_compress(&[60, 65, 0], false, &src, ElementTypeTag::F32, &[4096; 3])
            .unwrap();
        let mut caps: Vec<usize> = fitted.iter().map(|b| b.len()).collect();
        caps[1] -= 1;
        let err = engine
            .cascade_compress(&[60, 65, 0], false, &src, ElementTypeTag::F32, &caps)
            .unwrap_err();
        assert!(matches!(err, CascadeError::CapacityExceeded { index: 1, .. }));
    }

    #[test]
    fn validation_errors() {
        let engine = test_engine();
        let src = ramp(4);
        assert!(matches!(
            engine.cascade_compress(&[65], false, &src, ElementTypeTag::F32, &[64, 64]),
            Err(CascadeError::TargetCountMismatch { expected: 1, actual: 2 })
        ));
        assert!(matches!(
            engine.cascade_compress(&[65, 0], false, &src, ElementTypeTag::F32, &[64, 0]),
            Err(CascadeError::InvalidCapacity(1))
        ));
        assert!(matches!(
            engine.cascade_compress(&[90], false, &src, ElementTypeTag::F32, &[64]),
            Err(CascadeError::InvalidLevel { level: 90, .. })
        ));
        assert!(matches!(
            engine.cascade_compress(&[65], false, &src, ElementTypeTag::None, &[64]),
            Err(CascadeError::UnsupportedType(0))
        ));
    }

    #[test]
    fn exact_family_produces_one_buffer() {
        let engine = test_engine();
        let src: Vec<u8> = (0u16..64).flat_map(|v| (v / 8).to_le_bytes()).collect();
        let bufs = engine
            .cascade_compress(&[3, 9, 0], true, &src, ElementTypeTag::U16, &[4096, 4096, 4096])
            .unwrap();
        assert_eq!(bufs.len(), 1);
        assert_eq!(bufs[0].header().buffer_count, 1);
        assert_eq!(bufs[0].header().discriminator.level(), 3);
        assert_eq!(
            engine.cascade_decompress(&bufs, ElementTypeTag::U16, src.len()).unwrap(),
            src
        );
        assert!(matches!(
            engine.cascade_compress(&[3], false, &src[..5], ElementTypeTag::U16, &[4096]),
            Err(CascadeError::MisalignedBuffer { len: 5, element_size: 2 })
        ));
    }
}
