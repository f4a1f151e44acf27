//! Narrow data-store adapter consumed by action plugins.
//!
//! The real archive backend (HDF5 trees, object storage) lives outside the
//! engine; plugins only need read/replace/delete over sample blocks. The
//! `replace` implementation guarantees the swap is atomic — no partial-write
//! state is observable to readers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::KeeperError;
use crate::unit::DataUnit;

/// In-memory view of one dataset: row-major samples, `samples[t][c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub samples: Vec<Vec<f64>>,
    /// Spatial index of the first column.
    pub channel_offset: u32,
}

impl Block {
    pub fn new(samples: Vec<Vec<f64>>, channel_offset: u32) -> Self {
        Self { samples, channel_offset }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn channel_count(&self) -> usize {
        self.samples.first().map(Vec::len).unwrap_or(0)
    }

    /// Nominal byte size (f64 samples), used for outcome accounting.
    pub fn byte_len(&self) -> u64 {
        (self.sample_count() * self.channel_count() * std::mem::size_of::<f64>()) as u64
    }
}

/// Adapter over the archive backend.
pub trait DataStore: Send + Sync {
    fn read(&self, unit: &DataUnit) -> Result<Block, KeeperError>;

    /// Atomically swap the unit's content for `block`. Returns the new byte size.
    fn replace(&self, unit: &DataUnit, block: Block) -> Result<u64, KeeperError>;

    /// Write `block` next to the source unit under a derived name.
    /// Returns the path of the new dataset; the source is untouched.
    fn write_alongside(&self, unit: &DataUnit, suffix: &str, block: Block)
        -> Result<PathBuf, KeeperError>;

    /// Remove the unit. Returns the byte size that was reclaimed.
    fn delete(&self, unit: &DataUnit) -> Result<u64, KeeperError>;

    fn size_of(&self, unit: &DataUnit) -> Result<u64, KeeperError>;
}

/// Heap-backed store used by tests and the demo wiring.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<PathBuf, Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, block: Block) {
        self.blocks
            .write()
            .expect("store lock poisoned")
            .insert(path.into(), block);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.blocks
            .read()
            .expect("store lock poisoned")
            .contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<Block> {
        self.blocks
            .read()
            .expect("store lock poisoned")
            .get(path)
            .cloned()
    }

    fn derived_path(unit: &DataUnit, suffix: &str) -> PathBuf {
        let stem = unit
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset");
        let ext = unit
            .path
            .extension()
            .and_then(|s| s.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        unit.path.with_file_name(format!("{stem}{suffix}{ext}"))
    }
}

impl DataStore for MemoryStore {
    fn read(&self, unit: &DataUnit) -> Result<Block, KeeperError> {
        self.get(&unit.path)
            .ok_or_else(|| KeeperError::UnitNotFound(unit.display_key()))
    }

    fn replace(&self, unit: &DataUnit, block: Block) -> Result<u64, KeeperError> {
        let bytes = block.byte_len();
        let mut blocks = self.blocks.write().expect("store lock poisoned");
        if !blocks.contains_key(&unit.path) {
            return Err(KeeperError::UnitNotFound(unit.display_key()));
        }
        blocks.insert(unit.path.clone(), block);
        Ok(bytes)
    }

    fn write_alongside(
        &self,
        unit: &DataUnit,
        suffix: &str,
        block: Block,
    ) -> Result<PathBuf, KeeperError> {
        let path = Self::derived_path(unit, suffix);
        self.blocks
            .write()
            .expect("store lock poisoned")
            .insert(path.clone(), block);
        Ok(path)
    }

    fn delete(&self, unit: &DataUnit) -> Result<u64, KeeperError> {
        let removed = self
            .blocks
            .write()
            .expect("store lock poisoned")
            .remove(&unit.path);
        match removed {
            Some(block) => Ok(block.byte_len()),
            None => Err(KeeperError::UnitNotFound(unit.display_key())),
        }
    }

    fn size_of(&self, unit: &DataUnit) -> Result<u64, KeeperError> {
        match self.get(&unit.path) {
            Some(block) => Ok(block.byte_len()),
            None => Ok(unit.size_bytes),
        }
    }
}

/// Filesystem-backed store: a dataset is a flat little-endian f64 matrix,
/// rows = samples, columns = the unit's channels.
///
/// `replace` writes to a temp file and renames it over the source, so no
/// partial-write state is ever observable.
#[derive(Debug, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }

    fn row_width(unit: &DataUnit) -> usize {
        (unit.channel_count().max(1)) as usize
    }

    fn encode(block: &Block) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(block.byte_len() as usize);
        for row in &block.samples {
            for value in row {
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        bytes
    }

    fn decode(bytes: &[u8], channels: usize, channel_offset: u32) -> Block {
        let row_bytes = channels * std::mem::size_of::<f64>();
        let samples = bytes
            .chunks_exact(row_bytes)
            .map(|row| {
                row.chunks_exact(std::mem::size_of::<f64>())
                    .map(|v| f64::from_le_bytes(v.try_into().expect("8-byte chunk")))
                    .collect()
            })
            .collect();
        Block::new(samples, channel_offset)
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), KeeperError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl DataStore for FsStore {
    fn read(&self, unit: &DataUnit) -> Result<Block, KeeperError> {
        let bytes = std::fs::read(&unit.path)
            .map_err(|_| KeeperError::UnitNotFound(unit.display_key()))?;
        Ok(Self::decode(&bytes, Self::row_width(unit), unit.channel_range.0))
    }

    fn replace(&self, unit: &DataUnit, block: Block) -> Result<u64, KeeperError> {
        if !unit.path.exists() {
            return Err(KeeperError::UnitNotFound(unit.display_key()));
        }
        let bytes = Self::encode(&block);
        Self::write_atomic(&unit.path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    fn write_alongside(
        &self,
        unit: &DataUnit,
        suffix: &str,
        block: Block,
    ) -> Result<PathBuf, KeeperError> {
        let path = MemoryStore::derived_path(unit, suffix);
        Self::write_atomic(&path, &Self::encode(&block))?;
        Ok(path)
    }

    fn delete(&self, unit: &DataUnit) -> Result<u64, KeeperError> {
        let size = self.size_of(unit)?;
        std::fs::remove_file(&unit.path)?;
        Ok(size)
    }

    fn size_of(&self, unit: &DataUnit) -> Result<u64, KeeperError> {
        let meta = std::fs::metadata(&unit.path)
            .map_err(|_| KeeperError::UnitNotFound(unit.display_key()))?;
        Ok(meta.len())
    }
}
