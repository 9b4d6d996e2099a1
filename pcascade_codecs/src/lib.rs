mod mantissa;
mod rle;

pub use mantissa::{dropped_bits, MantissaCascade};
pub use rle::RunLength;

use pcascade_core::codec::{CodecSet, ExactCodec, FloatTransform};
use std::sync::Arc;

/// The bundled float transform and integer codec.
pub fn default_codecs() -> CodecSet {
    CodecSet::new(Arc::new(MantissaCascade::default()), Arc::new(RunLength))
}

/// Resolve a float transform by name.
pub fn float_by_name(name: &str, zstd_level: i32) -> anyhow::Result<Arc<dyn FloatTransform>> {
    match name {
        "mantissa" | "m" => Ok(Arc::new(MantissaCascade::new(zstd_level))),
        other => anyhow::bail!("unknown float transform '{}'. Valid options: mantissa", other),
    }
}

/// Resolve an integer codec by name.
pub fn exact_by_name(name: &str) -> anyhow::Result<Arc<dyn ExactCodec>> {
    match name {
        "rle" | "run-length" => Ok(Arc::new(RunLength)),
        other => anyhow::bail!("unknown integer codec '{}'. Valid options: rle", other),
    }
}
