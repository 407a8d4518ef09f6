//! In-memory backing stores.
//!
//! Used by the tests and by the host-side simulator in place of a real disk.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

use crate::{BackingStore, FileSystem, IoError};

/// A fixed-size file held in memory.
#[derive(Debug)]
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
}

impl MemoryFile {
    /// Creates a zero-filled file of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    /// Creates a file holding `bytes`.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(bytes),
        }
    }

    /// Returns a copy of the file's current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BackingStore for MemoryFile {
    fn read_at(&self, buf: &mut [u8], offset: usize) -> Result<usize, IoError> {
        let data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let count = buf.len().min(data.len() - offset);
        buf[..count].copy_from_slice(&data[offset..offset + count]);
        Ok(count)
    }

    fn write_at(&self, buf: &[u8], offset: usize) -> Result<usize, IoError> {
        let mut data = self.data.lock();
        if offset >= data.len() {
            return Ok(0);
        }
        let count = buf.len().min(data.len() - offset);
        data[offset..offset + count].copy_from_slice(&buf[..count]);
        Ok(count)
    }

    fn len(&self) -> usize {
        self.data.lock().len()
    }
}

/// A flat namespace of [`MemoryFile`]s.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeMap<String, Arc<MemoryFile>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given contents, replacing any file of the same name.
    pub fn insert(&self, name: &str, bytes: Vec<u8>) -> Arc<MemoryFile> {
        let file = Arc::new(MemoryFile::from_bytes(bytes));
        self.files.lock().insert(name.to_string(), file.clone());
        file
    }

    /// Returns the concrete file named `name`.
    pub fn file(&self, name: &str) -> Option<Arc<MemoryFile>> {
        self.files.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<MemoryFile>> {
        self.files.lock().remove(name)
    }
}

impl FileSystem for MemoryFileSystem {
    fn open(&self, name: &str) -> Option<Arc<dyn BackingStore>> {
        let file: Arc<dyn BackingStore> = self.file(name)?;
        Some(file)
    }

    fn create(&self, name: &str, size: usize) -> Result<Arc<dyn BackingStore>, IoError> {
        log::debug!("creating {} ({} bytes)", name, size);
        let file: Arc<dyn BackingStore> = self.insert(name, vec![0; size]);
        Ok(file)
    }
}
