//! Per-column cascade index.
//!
//! A [`ColumnCascadeIndex`] records where each block of one column's cascade
//! buffer lives in the dataset's [`CascadeStore`]: two parallel tables,
//! `lengths[block]` and `offsets[block]`, both zero for blocks never written.

use std::fmt;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{CascadeError, Result};
use crate::format::{BlockRecord, BLOCK_RECORD_SIZE};
use crate::store::CascadeStore;

/// Smallest table size after any growth.
pub const MIN_GROWTH: usize = 10;

/// Table size after a write to `requested` overflows the current tables:
/// `max(10, 1.5 × requested)`, and always large enough to hold `requested`.
pub fn grown_capacity(requested: usize) -> usize {
    let scaled = requested + requested / 2;
    scaled.max(MIN_GROWTH).max(requested + 1)
}

/// Reusable read buffer for one index.
///
/// Borrowed mutably for the duration of a single retrieve, so at most one
/// read per index is in flight. Grows with 5% head-room to limit churn.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    buf: Vec<u8>,
}

impl StagingBuffer {
    /// Borrow exactly `len` bytes, growing the backing storage if needed.
    pub fn acquire(&mut self, len: usize) -> &mut [u8] {
        if self.buf.len() < len {
            let target = len + len / 20;
            self.buf.resize(target, 0);
        }
        &mut self.buf[..len]
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

#[derive(Serialize, Deserialize)]
pub struct ColumnCascadeIndex {
    /// Full name of the column this index augments.
    column: String,
    /// Position in the precision cascade.
    level: u32,
    /// Record length on storage, per block.
    lengths: Vec<u64>,
    /// Record offset on storage, per block.
    offsets: Vec<u64>,
    #[serde(skip)]
    staging: StagingBuffer,
    #[serde(skip)]
    store: Option<Arc<dyn CascadeStore>>,
}

impl ColumnCascadeIndex {
    /// An index sized for `max_blocks` blocks, all unwritten.
    pub fn new(column: impl Into<String>, level: u32, max_blocks: usize) -> Self {
        Self {
            column: column.into(),
            level,
            lengths: vec![0; max_blocks],
            offsets: vec![0; max_blocks],
            staging: StagingBuffer::default(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CascadeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn attach_store(&mut self, store: Arc<dyn CascadeStore>) {
        self.store = Some(store);
    }

    pub fn detach_store(&mut self) -> Option<Arc<dyn CascadeStore>> {
        self.store.take()
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Current table size.
    pub fn max_blocks(&self) -> usize {
        self.lengths.len()
    }

    /// `(record length, offset)` of a block, if it was ever written.
    pub fn location(&self, block_id: usize) -> Option<(u64, u64)> {
        let len = *self.lengths.get(block_id)?;
        let offset = *self.offsets.get(block_id)?;
        if len == 0 && offset == 0 {
            return None;
        }
        Some((len, offset))
    }

    /// Number of blocks with a recorded location.
    pub fn written_blocks(&self) -> usize {
        (0..self.max_blocks())
            .filter(|&b| self.location(b).is_some())
            .count()
    }

    fn store(&self) -> Result<&Arc<dyn CascadeStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| CascadeError::StoreDetached(self.column.clone()))
    }

    /// Fails if the two tables disagree in length, which only a damaged
    /// catalog file can produce.
    pub fn check_tables(&self) -> Result<()> {
        if self.lengths.len() != self.offsets.len() {
            return Err(CascadeError::CorruptBlock {
                block: self.lengths.len().min(self.offsets.len()),
                reason: format!(
                    "column {} has {} lengths but {} offsets",
                    self.column,
                    self.lengths.len(),
                    self.offsets.len()
                ),
            });
        }
        Ok(())
    }

    fn ensure_capacity(&mut self, block_id: usize) {
        if block_id < self.lengths.len() && block_id < self.offsets.len() {
            return;
        }
        let new_size = grown_capacity(block_id).max(self.lengths.len()).max(self.offsets.len());
        debug!(
            "growing cascade index {} from {} to {} blocks",
            self.column,
            self.lengths.len(),
            new_size
        );
        self.lengths.resize(new_size, 0);
        self.offsets.resize(new_size, 0);
    }

    /// Persist one block's compressed bytes and record where they landed.
    ///
    /// Returns the offset of the stored record. Re-storing a block records the
    /// new location; the old record stays on storage, unreferenced.
    pub fn store_block(&mut self, block_id: usize, bytes: &[u8], original_len: usize) -> Result<u64> {
        let record = BlockRecord {
            level: self.level,
            block_id: u32::try_from(block_id).map_err(|_| CascadeError::CorruptBlock {
                block: block_id,
                reason: "block id does not fit a record header".to_string(),
            })?,
            original_len: u32::try_from(original_len).map_err(|_| CascadeError::CorruptBlock {
                block: block_id,
                reason: format!("original length {original_len} does not fit a record header"),
            })?,
            payload_len: u32::try_from(bytes.len()).map_err(|_| CascadeError::CorruptBlock {
                block: block_id,
                reason: format!("payload of {} bytes does not fit a record header", bytes.len()),
            })?,
            checksum: xxh3_64(bytes),
        };

        let mut staged = Vec::with_capacity(BLOCK_RECORD_SIZE + bytes.len());
        staged.extend_from_slice(&record.to_bytes());
        staged.extend_from_slice(bytes);

        let offset = self.store()?.append(&staged)?;

        self.ensure_capacity(block_id);
        if self.location(block_id).is_some() {
            debug!("cascade index {}: block {} overwritten", self.column, block_id);
        }
        self.lengths[block_id] = staged.len() as u64;
        self.offsets[block_id] = offset;
        debug!(
            "cascade index {}: stored block {} ({} bytes) at offset {}",
            self.column,
            block_id,
            staged.len(),
            offset
        );
        Ok(offset)
    }

    /// Read one block back. The returned slice borrows the index's staging
    /// buffer and is valid until the next retrieve.
    pub fn retrieve_block(&mut self, block_id: usize) -> Result<&[u8]> {
        self.retrieve_block_with_len(block_id).map(|(payload, _)| payload)
    }

    /// Like [`retrieve_block`](Self::retrieve_block), also returning the
    /// original length recorded at store time.
    pub fn retrieve_block_with_len(&mut self, block_id: usize) -> Result<(&[u8], usize)> {
        let (len, offset) = self.location(block_id).ok_or_else(|| CascadeError::UnknownBlock {
            column: self.column.clone(),
            block: block_id,
        })?;
        let len = usize::try_from(len).map_err(|_| CascadeError::CorruptBlock {
            block: block_id,
            reason: format!("record length {len} exceeds addressable memory"),
        })?;
        if len < BLOCK_RECORD_SIZE {
            return Err(CascadeError::CorruptBlock {
                block: block_id,
                reason: format!("record length {len} is shorter than its header"),
            });
        }

        let store = Arc::clone(self.store()?);
        let staging = self.staging.acquire(len);
        store.read_at(offset, staging)?;

        let mut head = [0u8; BLOCK_RECORD_SIZE];
        head.copy_from_slice(&staging[..BLOCK_RECORD_SIZE]);
        let record = BlockRecord::from_bytes(&head).ok_or_else(|| CascadeError::CorruptBlock {
            block: block_id,
            reason: "bad record magic".to_string(),
        })?;
        if record.block_id as usize != block_id {
            return Err(CascadeError::CorruptBlock {
                block: block_id,
                reason: format!("record belongs to block {}", record.block_id),
            });
        }
        let payload = &staging[BLOCK_RECORD_SIZE..];
        if payload.len() != record.payload_len as usize {
            return Err(CascadeError::CorruptBlock {
                block: block_id,
                reason: format!(
                    "record holds {} payload bytes, header says {}",
                    payload.len(),
                    record.payload_len
                ),
            });
        }
        let checksum = xxh3_64(payload);
        if checksum != record.checksum {
            return Err(CascadeError::CorruptBlock {
                block: block_id,
                reason: format!(
                    "checksum mismatch: expected {:016x}, got {:016x}",
                    record.checksum, checksum
                ),
            });
        }
        debug!(
            "cascade index {}: retrieved block {} from offset {}",
            self.column, block_id, offset
        );
        Ok((payload, record.original_len as usize))
    }
}

impl fmt::Debug for ColumnCascadeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnCascadeIndex")
            .field("column", &self.column)
            .field("level", &self.level)
            .field("max_blocks", &self.max_blocks())
            .field("written", &self.written_blocks())
            .field("store", &self.store.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn index(max_blocks: usize) -> (ColumnCascadeIndex, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let idx = ColumnCascadeIndex::new("event.px", 1, max_blocks).with_store(store.clone());
        (idx, store)
    }

    #[test]
    fn growth_policy() {
        assert_eq!(grown_capacity(0), 10);
        assert_eq!(grown_capacity(4), 10);
        assert_eq!(grown_capacity(10), 15);
        assert_eq!(grown_capacity(37), 55);
    }

    #[test]
    fn growth_preserves_existing_locations() {
        let (mut idx, _store) = index(10);
        for b in 0..10 {
            idx.store_block(b, &[b as u8; 20], 80).unwrap();
        }
        let before: Vec<_> = (0..10).map(|b| idx.location(b).unwrap()).collect();

        idx.store_block(37, b"late block", 40).unwrap();
        assert!(idx.max_blocks() >= 38);
        let after: Vec<_> = (0..10).map(|b| idx.location(b).unwrap()).collect();
        assert_eq!(before, after);
        for b in 10..37 {
            assert_eq!(idx.location(b), None, "block {b} was never written");
        }
        assert_eq!(idx.retrieve_block(37).unwrap(), b"late block");
    }

    #[test]
    fn retrieve_round_trips_and_reports_original_len() {
        let (mut idx, _store) = index(4);
        let first = idx.store_block(0, b"first", 100).unwrap();
        let second = idx.store_block(1, b"second block", 200).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, (BLOCK_RECORD_SIZE + 5) as u64);

        let (payload, original) = idx.retrieve_block_with_len(1).unwrap();
        assert_eq!(payload, b"second block");
        assert_eq!(original, 200);
        assert_eq!(idx.retrieve_block(0).unwrap(), b"first");
    }

    #[test]
    fn unknown_blocks() {
        let (mut idx, _store) = index(4);
        idx.store_block(0, b"x", 1).unwrap();
        assert!(matches!(
            idx.retrieve_block(2),
            Err(CascadeError::UnknownBlock { block: 2, .. })
        ));
        assert!(matches!(
            idx.retrieve_block(99),
            Err(CascadeError::UnknownBlock { block: 99, .. })
        ));
    }

    #[test]
    fn corrupted_record_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut writer = ColumnCascadeIndex::new("c", 1, 2).with_store(store.clone());
        writer.store_block(0, b"payload", 7).unwrap();

        let mut bytes = store.snapshot();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let tampered = Arc::new(MemoryStore::new());
        tampered.append(&bytes).unwrap();

        writer.attach_store(tampered);
        assert!(matches!(
            writer.retrieve_block(0),
            Err(CascadeError::CorruptBlock { block: 0, .. })
        ));
    }

    #[test]
    fn detached_index_cannot_store() {
        let mut idx = ColumnCascadeIndex::new("c", 1, 2);
        assert!(matches!(
            idx.store_block(0, b"x", 1),
            Err(CascadeError::StoreDetached(_))
        ));
    }

    #[test]
    fn mismatched_tables_never_panic() {
        let json = r#"{"column":"c","level":1,"lengths":[40,40],"offsets":[0]}"#;
        let mut idx: ColumnCascadeIndex = serde_json::from_str(json).unwrap();
        assert!(matches!(
            idx.check_tables(),
            Err(CascadeError::CorruptBlock { block: 1, .. })
        ));
        assert_eq!(idx.location(1), None);
        assert!(matches!(
            idx.retrieve_block(1),
            Err(CascadeError::UnknownBlock { block: 1, .. })
        ));

        idx.attach_store(Arc::new(MemoryStore::new()));
        idx.store_block(1, b"mended", 6).unwrap();
        assert!(idx.check_tables().is_ok());
        assert_eq!(idx.retrieve_block(1).unwrap(), b"mended");
    }

    #[test]
    fn staging_buffer_is_reused() {
        let mut staging = StagingBuffer::default();
        assert_eq!(staging.acquire(100).len(), 100);
        assert_eq!(staging.capacity(), 105);
        assert_eq!(staging.acquire(50).len(), 50);
        assert_eq!(staging.capacity(), 105);
    }
}
