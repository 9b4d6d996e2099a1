//! Progressive-precision compression cascades for numeric arrays.
//!
//! A float array is compressed into an ordered list of buffers, coarsest
//! first; any prefix decodes to an approximation and the full list (with its
//! residual) decodes bit-exact. Integer arrays use a lossless codec and
//! produce a single buffer. Cascade buffers are indexed per column and block
//! and recorded in a per-dataset catalog.
//!
//! The codecs themselves live behind [`FloatTransform`] and [`ExactCodec`];
//! `pcascade_codecs` bundles a default pair.

pub mod cascade;
pub mod catalog;
pub mod codec;
pub mod compat;
pub mod config;
pub mod dtype;
pub mod engine;
pub mod error;
pub mod format;
pub mod index;
pub mod store;

#[cfg(test)]
mod testing;

pub use cascade::CascadeSpec;
pub use catalog::{Catalog, DatasetCascadeCatalogEntry, DatasetIdentity};
pub use codec::{CodecSet, ExactCodec, FloatLayer, FloatTransform};
pub use config::{Algorithm, CascadeConfig};
pub use dtype::{ElementTypeTag, FloatKind};
pub use engine::{CascadeEngine, CompressedBuffer};
pub use error::{CascadeError, Result};
pub use format::{CascadeHeader, Discriminator, HEADER_SIZE};
pub use index::ColumnCascadeIndex;
pub use store::{CascadeStore, FileStore, MemoryStore};
