use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

/// Positional byte storage shared by every cascade index of one dataset.
///
/// Implementations serialize physical writes internally: a record is either
/// fully appended or not at all, and concurrent appends never interleave.
pub trait CascadeStore: Send + Sync {
    /// Human-readable location for log and error messages.
    fn name(&self) -> &str;

    /// Append `record` and return the offset it starts at.
    fn append(&self, record: &[u8]) -> std::io::Result<u64>;

    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;

    /// Current size in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A store backed by one file.
///
/// The file handle lives behind a single mutex held only for the seek plus
/// the physical read or write; compression happens before the lock is taken.
pub struct FileStore {
    path: PathBuf,
    name: String,
    file: Mutex<FileState>,
}

struct FileState {
    file: File,
    len: u64,
}

impl FileStore {
    /// Create (or truncate) a store file.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        Ok(Self::from_file(path.as_ref(), file, 0))
    }

    /// Open an existing store file for reading and appending.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self::from_file(path.as_ref(), file, len))
    }

    fn from_file(path: &Path, file: File, len: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            name: path.display().to_string(),
            file: Mutex::new(FileState { file, len }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CascadeStore for FileStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn append(&self, record: &[u8]) -> std::io::Result<u64> {
        let mut state = self.file.lock();
        let offset = state.len;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(record)?;
        state.file.flush()?;
        state.len += record.len() as u64;
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let mut state = self.file.lock();
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.read_exact(buf)
    }

    fn len(&self) -> u64 {
        self.file.lock().len
    }
}

/// An in-memory store. Reads share a read lock.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl CascadeStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn append(&self, record: &[u8]) -> std::io::Result<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(record);
        Ok(offset)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let data = self.data.read();
        let start = usize::try_from(offset).map_err(|_| eof(offset))?;
        let end = start.checked_add(buf.len()).ok_or_else(|| eof(offset))?;
        let src = data.get(start..end).ok_or_else(|| eof(offset))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }
}

fn eof(offset: u64) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("read at offset {offset} runs past the end of the store"),
    )
}
