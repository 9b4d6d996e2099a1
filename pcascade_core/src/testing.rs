//! Uncompressed stand-ins for the codec traits, for unit tests in this crate.

use std::sync::Arc;

use crate::codec::{CodecSet, ExactCodec, FloatLayer, FloatTransform};
use crate::dtype::FloatKind;
use crate::engine::CascadeEngine;

/// Stores each layer as raw little-endian words: layer `i` holds the bits
/// between the previous and the current truncation point.
pub struct PlainLayers;

fn keep_mask(kind: FloatKind, sensitivity: i32) -> u64 {
    let dropped = (10 - sensitivity).clamp(0, kind.mantissa_bits() as i32) as u32;
    !((1u64 << dropped) - 1)
}

fn words(kind: FloatKind, src: &[u8]) -> Vec<u64> {
    src.chunks_exact(kind.element_size())
        .map(|c| match kind {
            FloatKind::F32 => u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64,
            FloatKind::F64 => u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]),
        })
        .collect()
}

fn bytes(kind: FloatKind, words: &[u64]) -> Vec<u8> {
    words
        .iter()
        .flat_map(|&w| match kind {
            FloatKind::F32 => (w as u32).to_le_bytes().to_vec(),
            FloatKind::F64 => w.to_le_bytes().to_vec(),
        })
        .collect()
}

impl FloatTransform for PlainLayers {
    fn name(&self) -> &'static str {
        "plain-layers"
    }

    fn compress(
        &self,
        kind: FloatKind,
        sensitivities: &[i32],
        residual: bool,
        src: &[u8],
    ) -> anyhow::Result<Vec<Vec<u8>>> {
        let values = words(kind, src);
        let mut keep = 0u64;
        let mut prev = vec![0u64; values.len()];
        let mut out = Vec::new();
        for &s in sensitivities {
            keep |= keep_mask(kind, s);
            let cur: Vec<u64> = values.iter().map(|v| v & keep).collect();
            let layer: Vec<u64> = cur.iter().zip(&prev).map(|(c, p)| c ^ p).collect();
            out.push(bytes(kind, &layer));
            prev = cur;
        }
        if residual {
            let layer: Vec<u64> = values.iter().zip(&prev).map(|(v, p)| v ^ p).collect();
            out.push(bytes(kind, &layer));
        }
        Ok(out)
    }

    fn reconstruct(
        &self,
        kind: FloatKind,
        layers: &[FloatLayer<'_>],
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>> {
        let mut acc: Vec<u64> = Vec::new();
        for layer in layers {
            anyhow::ensure!(layer.payload.len() <= max_len, "layer exceeds {max_len} bytes");
            let w = words(kind, layer.payload);
            if acc.is_empty() {
                acc = vec![0; w.len()];
            }
            anyhow::ensure!(w.len() == acc.len(), "layer length mismatch");
            let mask = layer.sensitivity.map_or(!0, |s| keep_mask(kind, s));
            for (a, v) in acc.iter_mut().zip(w) {
                *a ^= v & mask;
            }
        }
        Ok(bytes(kind, &acc))
    }
}

/// Copies integer arrays verbatim.
pub struct Verbatim;

impl ExactCodec for Verbatim {
    fn name(&self) -> &'static str {
        "verbatim"
    }

    fn compress(&self, _element_size: usize, _signed: bool, src: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(src.to_vec())
    }

    fn decompress(
        &self,
        _element_size: usize,
        _signed: bool,
        payload: &[u8],
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>> {
        anyhow::ensure!(payload.len() <= max_len, "payload exceeds {max_len} bytes");
        Ok(payload.to_vec())
    }
}

pub fn test_engine() -> CascadeEngine {
    CascadeEngine::new(CodecSet::new(Arc::new(PlainLayers), Arc::new(Verbatim)))
}

pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
