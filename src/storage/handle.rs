use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions};

use crate::core::error::{Error, ErrorKind, Result};

/// Memory-mapped read-only component file. Handles are shared between a
/// searcher and every posting iterator it spawns; the mapping is released
/// when the last `Arc` drops, never while an iterator still reads it.
#[derive(Debug)]
pub struct MmapFile {
    mmap: Mmap,
    len: usize,
    path: PathBuf,
}

impl MmapFile {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let file = File::open(&path)?;
        let metadata = file.metadata()?;
        let len = metadata.len() as usize;
        if len == 0 {
            return Err(Error::corruption(format!(
                "zero-byte component {}",
                path.as_ref().display()
            )));
        }

        let mmap = unsafe { MmapOptions::new().len(len).map(&file)? };

        Ok(Arc::new(MmapFile {
            mmap,
            len,
            path: path.as_ref().to_path_buf(),
        }))
    }

    pub fn data(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A byte range of a shared mapped file. Cheap to clone; iterators own a
/// slice, not the searcher that produced them.
#[derive(Clone, Debug)]
pub struct FileSlice {
    file: Arc<MmapFile>,
    offset: usize,
    len: usize,
}

impl FileSlice {
    pub fn new(file: Arc<MmapFile>, offset: usize, len: usize) -> Result<Self> {
        if offset + len > file.len() {
            return Err(Error::new(
                ErrorKind::Corruption,
                format!(
                    "slice {}..{} out of bounds for {} ({} bytes)",
                    offset,
                    offset + len,
                    file.path().display(),
                    file.len()
                ),
            ));
        }
        Ok(FileSlice { file, offset, len })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.file.data()[self.offset..self.offset + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A sub-slice relative to this slice.
    pub fn slice(&self, offset: usize, len: usize) -> Result<FileSlice> {
        if offset + len > self.len {
            return Err(Error::corruption("sub-slice out of bounds"));
        }
        FileSlice::new(Arc::clone(&self.file), self.offset + offset, len)
    }
}
