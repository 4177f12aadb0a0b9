//! # Packed Containers
//!
//! A bundle can be packed into a single ZIP file for archival. The archive
//! opens read-only; dataset reads go straight to the Stored (uncompressed)
//! Parquet entries without unpacking to disk.
//!
//! Entry layout, in order:
//!
//! 1. `mimetype` — Stored, holds [`SPMVAULT_MIMETYPE`], always first so the
//!    container type is identifiable from the leading bytes
//! 2. `manifest.json`, `metadata/*.json` — Deflate
//! 3. `data/**/*.parquet`, `process/**/*.parquet` — Stored

use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::reference::DataPath;
use crate::schema::{DATA_DIR, MANIFEST_FILE, METADATA_DIR, PROCESS_DIR, SPMVAULT_MIMETYPE};
use crate::store::{self, StoreError, StoredDataset};

/// Errors raised while packing or reading packed containers
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// ZIP structure error
    #[error("archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    /// Dataset storage error
    #[error(transparent)]
    StoreError(#[from] StoreError),

    /// The file is not a packed container
    #[error("not a packed container: {0}")]
    NotAContainer(String),

    /// The archive is missing a required entry
    #[error("archive has no entry {0}")]
    MissingEntry(String),
}

/// Pack a bundle directory into a single archive file
pub fn pack(bundle: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<(), ArchiveError> {
    let bundle = bundle.as_ref();
    let out = out.as_ref();

    let manifest = bundle.join(MANIFEST_FILE);
    if !manifest.is_file() {
        return Err(ArchiveError::NotAContainer(bundle.display().to_string()));
    }

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut writer = ZipWriter::new(File::create(out)?);

    // mimetype first so `file` and readers can identify the container type.
    writer.start_file("mimetype", stored)?;
    writer.write_all(SPMVAULT_MIMETYPE.as_bytes())?;

    writer.start_file(MANIFEST_FILE, deflated)?;
    writer.write_all(&std::fs::read(manifest)?)?;

    let mut entries = Vec::new();
    for dir in [METADATA_DIR, DATA_DIR, PROCESS_DIR] {
        collect_files(&bundle.join(dir), dir, &mut entries)?;
    }
    entries.sort();

    for name in entries {
        let options = if name.ends_with(".parquet") { stored } else { deflated };
        writer.start_file(&name, options)?;
        writer.write_all(&std::fs::read(bundle.join(&name))?)?;
    }

    writer.finish()?;
    log::info!("packed {} into {}", bundle.display(), out.display());
    Ok(())
}

fn collect_files(dir: &Path, prefix: &str, entries: &mut Vec<String>) -> Result<(), ArchiveError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let child = entry.path();
        if child.is_dir() {
            collect_files(&child, &format!("{prefix}/{name}"), entries)?;
        } else {
            entries.push(format!("{prefix}/{name}"));
        }
    }
    Ok(())
}

/// An open packed container
#[derive(Debug)]
pub struct PackedContainer {
    archive: ZipArchive<Cursor<Bytes>>,
    manifest_json: String,
    entry_names: Vec<String>,
}

impl PackedContainer {
    /// Open a packed container, validating the leading mimetype entry
    pub fn open(path: impl AsRef<Path>) -> Result<PackedContainer, ArchiveError> {
        let path = path.as_ref();
        let bytes = Bytes::from(std::fs::read(path)?);
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        {
            let mut first = archive.by_index(0)?;
            let mut mimetype = String::new();
            first.read_to_string(&mut mimetype)?;
            if first.name() != "mimetype" || mimetype != SPMVAULT_MIMETYPE {
                return Err(ArchiveError::NotAContainer(path.display().to_string()));
            }
        }

        let manifest_json = {
            let mut entry = archive
                .by_name(MANIFEST_FILE)
                .map_err(|_| ArchiveError::MissingEntry(MANIFEST_FILE.to_string()))?;
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            json
        };

        let entry_names = archive.file_names().map(str::to_string).collect();
        Ok(PackedContainer {
            archive,
            manifest_json,
            entry_names,
        })
    }

    /// Raw manifest JSON read at open time
    pub fn manifest_json(&self) -> &str {
        &self.manifest_json
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry = self
            .archive
            .by_name(name)
            .map_err(|_| ArchiveError::MissingEntry(name.to_string()))?;
        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    /// Read a dataset from its Stored Parquet entry
    pub fn read_dataset(&mut self, path: &DataPath) -> Result<StoredDataset, ArchiveError> {
        let buffer = self.read_entry(&format!("{path}.parquet"))?;
        Ok(store::read_dataset_from(Bytes::from(buffer))?)
    }

    /// Raw source metadata JSON for an ingested file
    pub fn read_metadata_json(&mut self, source_name: &str) -> Result<String, ArchiveError> {
        let buffer = self.read_entry(&format!("{METADATA_DIR}/{source_name}.json"))?;
        String::from_utf8(buffer)
            .map_err(|_| ArchiveError::NotAContainer(source_name.to_string()))
    }

    /// Whether a dataset entry exists
    pub fn contains(&self, path: &DataPath) -> bool {
        let name = format!("{path}.parquet");
        self.entry_names.iter().any(|entry| entry == &name)
    }

    /// All dataset paths in the archive, sorted
    pub fn dataset_paths(&self) -> Vec<DataPath> {
        let mut paths: Vec<DataPath> = self
            .entry_names
            .iter()
            .filter_map(|name| name.strip_suffix(".parquet"))
            .map(DataPath::new)
            .collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Container, ContainerError, OpenMode};
    use crate::dataset::{ArrayData, DatasetAttributes};
    use tempfile::tempdir;

    fn packed_fixture(dir: &Path) -> std::path::PathBuf {
        let bundle = dir.join("scan.spmvault");
        let mut container = Container::open(&bundle, OpenMode::Create).unwrap();
        let array = ArrayData::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let attributes = DatasetAttributes::new("Height", array.shape());
        container
            .write(&DataPath::new("data/scan01/Height"), array, attributes)
            .unwrap();
        container.close().unwrap();

        let packed = dir.join("scan.zip");
        pack(&bundle, &packed).unwrap();
        packed
    }

    #[test]
    fn test_mimetype_is_first_stored_entry() {
        let dir = tempdir().unwrap();
        let packed = packed_fixture(dir.path());

        let mut archive = ZipArchive::new(File::open(&packed).unwrap()).unwrap();
        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_parquet_entries_stored_uncompressed() {
        let dir = tempdir().unwrap();
        let packed = packed_fixture(dir.path());

        let mut archive = ZipArchive::new(File::open(&packed).unwrap()).unwrap();
        let entry = archive.by_name("data/scan01/Height.parquet").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_pack_then_read_back() {
        let dir = tempdir().unwrap();
        let packed = packed_fixture(dir.path());

        let mut container = Container::open(&packed, OpenMode::ReadOnly).unwrap();
        let dataset = container.read(&DataPath::new("data/scan01/Height")).unwrap();
        assert_eq!(dataset.array.values(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            container.dataset_paths().unwrap(),
            vec![DataPath::new("data/scan01/Height")]
        );
    }

    #[test]
    fn test_packed_rejects_read_write_open() {
        let dir = tempdir().unwrap();
        let packed = packed_fixture(dir.path());

        let err = Container::open(&packed, OpenMode::ReadWrite).unwrap_err();
        assert!(matches!(err, ContainerError::PackedReadOnly));
    }

    #[test]
    fn test_random_zip_is_not_a_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.zip");
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("hello.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"hi").unwrap();
        writer.finish().unwrap();

        let err = PackedContainer::open(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::NotAContainer(_)));
    }

    #[test]
    fn test_pack_non_bundle_rejected() {
        let dir = tempdir().unwrap();
        let not_a_bundle = dir.path().join("plain");
        std::fs::create_dir(&not_a_bundle).unwrap();

        let err = pack(&not_a_bundle, dir.path().join("out.zip")).unwrap_err();
        assert!(matches!(err, ArchiveError::NotAContainer(_)));
    }
}
