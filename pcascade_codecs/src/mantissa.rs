use log::debug;
use pcascade_core::codec::{FloatLayer, FloatTransform};
use pcascade_core::dtype::FloatKind;

/// Mantissa bit-plane cascade.
///
/// Each sensitivity `s` keeps all but the lowest `clamp(10 - s, 0, m)` mantissa
/// bits, where `m` is 23 for f32 and 52 for f64. Layer `i` holds exactly the
/// bits gained between sensitivity `i - 1` and `i`, so XOR-ing a prefix of
/// layers rebuilds the truncated value. The residual carries every bit the
/// last level dropped.
///
/// Every layer is compressed independently with zstd and decoded with a
/// hard output limit. Truncated low bits are
/// zero, which is what makes the coarse layers small.
pub struct MantissaCascade {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub zstd_level: i32,
}

impl Default for MantissaCascade {
    fn default() -> Self {
        Self { zstd_level: 3 }
    }
}

impl MantissaCascade {
    pub fn new(zstd_level: i32) -> Self {
        Self { zstd_level }
    }
}

/// Number of low mantissa bits a sensitivity discards.
pub fn dropped_bits(kind: FloatKind, sensitivity: i32) -> u32 {
    (10 - sensitivity).clamp(0, kind.mantissa_bits() as i32) as u32
}

fn keep_mask(kind: FloatKind, sensitivity: i32) -> u64 {
    !((1u64 << dropped_bits(kind, sensitivity)) - 1)
}

fn to_words(kind: FloatKind, raw: &[u8]) -> anyhow::Result<Vec<u64>> {
    let size = kind.element_size();
    anyhow::ensure!(
        raw.len() % size == 0,
        "layer of {} bytes is not a whole number of {}-byte floats",
        raw.len(),
        size
    );
    Ok(raw
        .chunks_exact(size)
        .map(|c| match kind {
            FloatKind::F32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64,
            FloatKind::F64 => u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
        })
        .collect())
}

fn to_bytes(kind: FloatKind, words: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * kind.element_size());
    for &w in words {
        match kind {
            FloatKind::F32 => out.extend_from_slice(&(w as u32).to_le_bytes()),
            FloatKind::F64 => out.extend_from_slice(&w.to_le_bytes()),
        }
    }
    out
}

impl FloatTransform for MantissaCascade {
    fn name(&self) -> &'static str {
        "mantissa"
    }

    fn compress(
        &self,
        kind: FloatKind,
        sensitivities: &[i32],
        residual: bool,
        src: &[u8],
    ) -> anyhow::Result<Vec<Vec<u8>>> {
        let values = to_words(kind, src)?;
        let mut keep = 0u64;
        let mut prev = vec![0u64; values.len()];
        let mut layers = Vec::with_capacity(sensitivities.len() + usize::from(residual));

        for &s in sensitivities {
            // Cumulative: a coarser level listed later never loses bits.
            keep |= keep_mask(kind, s);
            let mut plane = Vec::with_capacity(values.len());
            for (v, p) in values.iter().zip(prev.iter_mut()) {
                let cur = v & keep;
                plane.push(cur ^ *p);
                *p = cur;
            }
            layers.push(zstd::bulk::compress(&to_bytes(kind, &plane), self.zstd_level)?);
        }
        if residual {
            let plane: Vec<u64> = values.iter().zip(&prev).map(|(v, p)| v ^ p).collect();
            layers.push(zstd::bulk::compress(&to_bytes(kind, &plane), self.zstd_level)?);
        }
        debug!(
            "mantissa cascade: {} floats -> layers of {:?} bytes",
            values.len(),
            layers.iter().map(Vec::len).collect::<Vec<_>>()
        );
        Ok(layers)
    }

    fn reconstruct(
        &self,
        kind: FloatKind,
        layers: &[FloatLayer<'_>],
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>> {
        let mut acc: Option<Vec<u64>> = None;
        for layer in layers {
            let i = layer.position;
            // Bounded: a frame claiming more than max_len bytes fails here.
            let raw = zstd::bulk::decompress(layer.payload, max_len)
                .map_err(|e| anyhow::anyhow!("zstd decode of layer {}: {}", i, e))?;
            let plane = to_words(kind, &raw)?;
            let mask = layer.sensitivity.map_or(!0, |s| keep_mask(kind, s));
            let acc = acc.get_or_insert_with(|| vec![0; plane.len()]);
            anyhow::ensure!(
                plane.len() == acc.len(),
                "layer {} holds {} floats, earlier layers hold {}",
                i,
                plane.len(),
                acc.len()
            );
            for (a, p) in acc.iter_mut().zip(plane) {
                *a ^= p & mask;
            }
        }
        Ok(to_bytes(kind, &acc.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_bytes(v: &[f64]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    fn layers<'a>(payloads: &'a [Vec<u8>], sens: &[Option<i32>]) -> Vec<FloatLayer<'a>> {
        payloads
            .iter()
            .zip(sens)
            .enumerate()
            .map(|(position, (p, &s))| FloatLayer {
                position,
                sensitivity: s,
                payload: p,
            })
            .collect()
    }

    #[test]
    fn dropped_bits_follow_sensitivity() {
        assert_eq!(dropped_bits(FloatKind::F32, 4), 6);
        assert_eq!(dropped_bits(FloatKind::F32, 6), 4);
        assert_eq!(dropped_bits(FloatKind::F32, 10), 0);
        assert_eq!(dropped_bits(FloatKind::F32, -60), 23);
        assert_eq!(dropped_bits(FloatKind::F64, -60), 52);
    }

    #[test]
    fn prefix_truncates_and_residual_restores() {
        let codec = MantissaCascade::default();
        let src = f64_bytes(&[std::f64::consts::PI, -1.0e-7, 12345.678, 0.0]);
        let out = codec.compress(FloatKind::F64, &[2, 6], true, &src).unwrap();
        assert_eq!(out.len(), 3);

        let full = codec
            .reconstruct(FloatKind::F64, &layers(&out, &[Some(2), Some(6), None]), src.len())
            .unwrap();
        assert_eq!(full, src);

        let coarse = codec
            .reconstruct(FloatKind::F64, &layers(&out[..1], &[Some(2)]), src.len())
            .unwrap();
        let mask = !((1u64 << 8) - 1);
        for (c, s) in coarse.chunks_exact(8).zip(src.chunks_exact(8)) {
            let c = u64::from_le_bytes(c.try_into().unwrap());
            let s = u64::from_le_bytes(s.try_into().unwrap());
            assert_eq!(c, s & mask);
        }
    }

    #[test]
    fn rejects_mismatched_layers() {
        let codec = MantissaCascade::default();
        let a = codec.compress(FloatKind::F32, &[4], false, &[0u8; 8]).unwrap();
        let b = codec.compress(FloatKind::F32, &[6], false, &[0u8; 12]).unwrap();
        let err = codec.reconstruct(
            FloatKind::F32,
            &[
                FloatLayer { position: 0, sensitivity: Some(4), payload: &a[0] },
                FloatLayer { position: 1, sensitivity: Some(6), payload: &b[0] },
            ],
            12,
        );
        assert!(err.is_err());
        assert!(codec
            .reconstruct(
                FloatKind::F32,
                &[FloatLayer { position: 0, sensitivity: None, payload: b"junk" }],
                64
            )
            .is_err());
    }

    #[test]
    fn oversized_layer_is_refused() {
        let codec = MantissaCascade::default();
        let src = vec![0u8; 1 << 20];
        let out = codec.compress(FloatKind::F32, &[4], false, &src).unwrap();
        assert!(out[0].len() < 1024);

        let layer = [FloatLayer { position: 0, sensitivity: Some(4), payload: &out[0] }];
        assert!(codec.reconstruct(FloatKind::F32, &layer, 400).is_err());
        assert_eq!(codec.reconstruct(FloatKind::F32, &layer, src.len()).unwrap(), src);
    }
}
