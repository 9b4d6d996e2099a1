use std::sync::Arc;

use crate::dtype::FloatKind;

/// One float cascade layer handed back to [`FloatTransform::reconstruct`].
///
/// `sensitivity` is `None` for the residual layer.
#[derive(Debug, Clone, Copy)]
pub struct FloatLayer<'a> {
    /// Position in the cascade, 0 for the coarsest layer.
    pub position: usize,
    pub sensitivity: Option<i32>,
    pub payload: &'a [u8],
}

/// Lossy floating point transform that emits nested precision layers.
///
/// Implementations must honour the cascade contract:
/// - `compress` returns exactly `sensitivities.len()` payloads, plus one more
///   when `residual` is set, in the order given.
/// - Reconstructing from the first `k` payloads yields the array at the
///   precision of the `k`-th sensitivity.
/// - Reconstructing from all payloads including the residual is bit-exact.
/// - `reconstruct` returns whole elements; the caller derives the output
///   length from the element count, not from any stored size.
/// - No layer may decode to more than `max_len` bytes; exceeding it is an
///   error, reported before the memory is allocated.
pub trait FloatTransform: Send + Sync {
    /// Human-readable name for CLI display.
    fn name(&self) -> &'static str;

    fn compress(
        &self,
        kind: FloatKind,
        sensitivities: &[i32],
        residual: bool,
        src: &[u8],
    ) -> anyhow::Result<Vec<Vec<u8>>>;

    fn reconstruct(
        &self,
        kind: FloatKind,
        layers: &[FloatLayer<'_>],
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Lossless codec for fixed-width integer arrays.
///
/// Selection is by element width and signedness only; there are no levels.
/// `decompress` must fail instead of producing more than `max_len` bytes.
pub trait ExactCodec: Send + Sync {
    /// Human-readable name for CLI display.
    fn name(&self) -> &'static str;

    fn compress(&self, element_size: usize, signed: bool, src: &[u8]) -> anyhow::Result<Vec<u8>>;

    fn decompress(
        &self,
        element_size: usize,
        signed: bool,
        payload: &[u8],
        max_len: usize,
    ) -> anyhow::Result<Vec<u8>>;
}

/// The pair of codec families a cascade engine dispatches to.
#[derive(Clone)]
pub struct CodecSet {
    pub float: Arc<dyn FloatTransform>,
    pub exact: Arc<dyn ExactCodec>,
}

impl CodecSet {
    pub fn new(float: Arc<dyn FloatTransform>, exact: Arc<dyn ExactCodec>) -> Self {
        Self { float, exact }
    }
}

impl std::fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecSet")
            .field("float", &self.float.name())
            .field("exact", &self.exact.name())
            .finish()
    }
}
