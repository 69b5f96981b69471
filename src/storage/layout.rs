use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::core::error::{Error, Result};
use crate::core::types::{IndexKind, SSTableId};
use crate::storage::component::{ComponentType, Version};
use crate::storage::footer;
use crate::storage::handle::{FileSlice, MmapFile};

/// Names and owns the index files of one SSTable:
/// `<sstable>-SAI+<version>+<column|>+<ComponentType>.db`, where the
/// column part is empty for per-SSTable components.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub directory: PathBuf,
    pub sstable: SSTableId,
    pub version: Version,
}

impl IndexDescriptor {
    pub fn new(directory: impl Into<PathBuf>, sstable: SSTableId) -> Self {
        IndexDescriptor {
            directory: directory.into(),
            sstable,
            version: Version::CURRENT,
        }
    }

    pub fn file_name(&self, column: Option<&str>, ty: ComponentType) -> String {
        format!(
            "{}-SAI+{}+{}+{}.db",
            self.sstable.as_str(),
            self.version.as_str(),
            column.unwrap_or(""),
            ty.as_str()
        )
    }

    pub fn component_path(&self, column: Option<&str>, ty: ComponentType) -> PathBuf {
        self.directory.join(self.file_name(column, ty))
    }

    /// Write a data component: body plus checksummed footer, synced.
    pub fn write_component(
        &self,
        column: Option<&str>,
        ty: ComponentType,
        mut body: Vec<u8>,
    ) -> Result<()> {
        debug_assert!(!ty.is_marker());
        footer::append_footer(&mut body, self.version);
        let path = self.component_path(column, ty);
        let mut file = File::create(&path)?;
        file.write_all(&body)?;
        file.sync_all()?;
        Ok(())
    }

    /// Write a zero-length completion marker.
    pub fn write_marker(&self, column: Option<&str>, ty: ComponentType) -> Result<()> {
        debug_assert!(ty.is_marker());
        let path = self.component_path(column, ty);
        let file = File::create(&path)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn component_exists(&self, column: Option<&str>, ty: ComponentType) -> bool {
        self.component_path(column, ty).exists()
    }

    /// Open and checksum-validate a component, returning its format
    /// version and a shared slice of the body (footer stripped). A
    /// missing file here means the completion marker lied: corruption,
    /// not absence.
    pub fn open_component(
        &self,
        column: Option<&str>,
        ty: ComponentType,
    ) -> Result<(Version, FileSlice)> {
        let path = self.component_path(column, ty);
        if !path.exists() {
            return Err(Error::corruption(format!(
                "required component missing: {}",
                path.display()
            )));
        }
        let file = MmapFile::open_read_only(&path)?;
        let (version, body_len) = footer::validate_footer(file.data())?;
        let slice = FileSlice::new(file, 0, body_len)?;
        Ok((version, slice))
    }

    /// Remove every per-column file for one column, markers included.
    /// Missing files are fine; this runs during abort cleanup.
    pub fn delete_per_column(&self, column: &str, kind: IndexKind) {
        for ty in ComponentType::per_column_data(kind) {
            let _ = fs::remove_file(self.component_path(Some(column), *ty));
        }
        let _ = fs::remove_file(
            self.component_path(Some(column), ComponentType::ColumnCompletionMarker),
        );
        debug!(sstable = self.sstable.as_str(), column, "removed per-column index files");
    }

    /// Remove the shared per-SSTable files, group marker included.
    pub fn delete_per_sstable(&self) {
        for ty in ComponentType::per_sstable_data() {
            let _ = fs::remove_file(self.component_path(None, *ty));
        }
        let _ = fs::remove_file(self.component_path(None, ComponentType::GroupCompletionMarker));
        debug!(sstable = self.sstable.as_str(), "removed per-sstable index files");
    }
}
