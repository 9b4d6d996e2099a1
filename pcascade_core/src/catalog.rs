//! Per-dataset catalog entries and the file-backed catalog that holds them.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::index::ColumnCascadeIndex;
use crate::store::CascadeStore;

/// Who a catalog entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIdentity {
    pub name: String,
    /// Process-unique id assigned to the dataset when it was opened for writing.
    pub unique_id: u32,
}

impl DatasetIdentity {
    pub fn new(name: impl Into<String>, unique_id: u32) -> Self {
        Self {
            name: name.into(),
            unique_id,
        }
    }
}

/// Catalog name of the entry for `dataset_name` at `level`.
pub fn entry_name(dataset_name: &str, level: u32) -> String {
    format!("{dataset_name}_pc{level}")
}

/// All column cascade indices of one dataset at one cascade level.
#[derive(Serialize, Deserialize)]
pub struct DatasetCascadeCatalogEntry {
    name: String,
    dataset_id: u32,
    level: u32,
    /// Insertion order is preserved.
    columns: Vec<ColumnCascadeIndex>,
    #[serde(skip)]
    store: Option<Arc<dyn CascadeStore>>,
}

impl DatasetCascadeCatalogEntry {
    pub fn new(dataset: &DatasetIdentity, level: u32) -> Self {
        Self {
            name: entry_name(&dataset.name, level),
            dataset_id: dataset.unique_id,
            level,
            columns: Vec::new(),
            store: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset_id(&self) -> u32 {
        self.dataset_id
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    /// Fails if this entry was written for another dataset or level.
    pub fn verify(&self, dataset: &DatasetIdentity, level: u32) -> Result<()> {
        if self.dataset_id != dataset.unique_id || self.level != level {
            return Err(CascadeError::IdentityMismatch {
                name: self.name.clone(),
                recorded_id: self.dataset_id,
                recorded_level: self.level,
                expected_id: dataset.unique_id,
                expected_level: level,
            });
        }
        Ok(())
    }

    /// Attach the dataset's store to this entry and every column index.
    pub fn attach_store(&mut self, store: Arc<dyn CascadeStore>) {
        for column in &mut self.columns {
            column.attach_store(Arc::clone(&store));
        }
        self.store = Some(store);
    }

    /// Drop every reference this entry holds to its store.
    pub fn detach_store(&mut self) -> Option<Arc<dyn CascadeStore>> {
        for column in &mut self.columns {
            column.detach_store();
        }
        self.store.take()
    }

    pub fn column(&self, full_name: &str) -> Option<&ColumnCascadeIndex> {
        self.columns.iter().find(|c| c.column() == full_name)
    }

    pub fn column_mut(&mut self, full_name: &str) -> Option<&mut ColumnCascadeIndex> {
        self.columns.iter_mut().find(|c| c.column() == full_name)
    }

    /// The index for `full_name`, created with room for `max_blocks` if the
    /// column has not enabled cascade storage at this level yet.
    pub fn get_or_create_column(&mut self, full_name: &str, max_blocks: usize) -> &mut ColumnCascadeIndex {
        let pos = match self.columns.iter().position(|c| c.column() == full_name) {
            Some(pos) => pos,
            None => {
                let mut index = ColumnCascadeIndex::new(full_name, self.level, max_blocks);
                if let Some(store) = &self.store {
                    index.attach_store(Arc::clone(store));
                }
                debug!("{}: new cascade index for column {}", self.name, full_name);
                self.columns.push(index);
                self.columns.len() - 1
            }
        };
        &mut self.columns[pos]
    }

    /// Column indices in insertion order.
    pub fn columns(&self) -> impl Iterator<Item = &ColumnCascadeIndex> {
        self.columns.iter()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

impl fmt::Display for DatasetCascadeCatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\tdataset id: {}\tlevel: {}\tcolumns: {}",
            self.name,
            self.dataset_id,
            self.level,
            self.columns.len()
        )
    }
}

impl fmt::Debug for DatasetCascadeCatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetCascadeCatalogEntry")
            .field("name", &self.name)
            .field("dataset_id", &self.dataset_id)
            .field("level", &self.level)
            .field("columns", &self.columns)
            .finish()
    }
}

/// A directory of named catalog entries persisted as one JSON file.
#[derive(Debug)]
pub struct Catalog {
    path: PathBuf,
    entries: BTreeMap<String, DatasetCascadeCatalogEntry>,
}

impl Catalog {
    /// Open the catalog at `path`, starting empty if the file does not exist.
    /// Every column index is checked for intact tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries: BTreeMap<String, DatasetCascadeCatalogEntry> = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            BTreeMap::new()
        };
        for entry in entries.values() {
            for column in &entry.columns {
                column.check_tables()?;
            }
        }
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Store `entry` under its name, replacing an earlier version of the same
    /// entry. An existing entry of that name written for another dataset or
    /// level is never overwritten.
    pub fn save_entry(&mut self, entry: DatasetCascadeCatalogEntry) -> Result<()> {
        if let Some(existing) = self.entries.get(entry.name()) {
            if existing.dataset_id != entry.dataset_id || existing.level != entry.level {
                return Err(CascadeError::IdentityMismatch {
                    name: entry.name.clone(),
                    recorded_id: existing.dataset_id,
                    recorded_level: existing.level,
                    expected_id: entry.dataset_id,
                    expected_level: entry.level,
                });
            }
            debug!("catalog {}: overwriting {}", self.path.display(), entry.name());
        }
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Load the entry for `dataset` at `level`, verified against both.
    /// The entry is detached; attach the dataset's store before use.
    pub fn load_entry(&self, dataset: &DatasetIdentity, level: u32) -> Result<DatasetCascadeCatalogEntry> {
        let name = entry_name(&dataset.name, level);
        let entry = self
            .entries
            .get(&name)
            .ok_or_else(|| CascadeError::MissingEntry(name.clone()))?;
        entry.verify(dataset, level)?;
        // Round-trip through JSON to hand out an independent copy.
        let copy: DatasetCascadeCatalogEntry = serde_json::from_value(serde_json::to_value(entry)?)?;
        Ok(copy)
    }

    pub fn remove_entry(&mut self, name: &str) -> Option<DatasetCascadeCatalogEntry> {
        self.entries.remove(name)
    }

    /// Write every entry to the catalog file.
    pub fn flush(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, text)?;
        info!(
            "catalog {}: wrote {} entries",
            self.path.display(),
            self.entries.len()
        );
        Ok(())
    }
}
