//! # Container Handle
//!
//! A container is either a directory bundle (read-write) or a packed ZIP
//! archive (read-only). The handle owns the manifest, resolves [`DataPath`]s
//! to dataset files, ingests source files through the format converters, and
//! flushes the manifest on [`close`](Container::close) or drop.
//!
//! Bundle layout:
//!
//! ```text
//! scan.spmvault/
//! ├── manifest.json
//! ├── metadata/<source>.json
//! ├── data/<source>/<channel>.parquet
//! └── process/NNN-<op>/<name>.parquet
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveError, PackedContainer};
use crate::dataset::{ArrayData, Dataset, DatasetAttributes};
use crate::formats::{self, FormatError};
use crate::provenance::ProvenanceRecord;
use crate::reference::DataPath;
use crate::schema::{DATA_DIR, MANIFEST_FILE, METADATA_DIR, PROCESS_DIR, SPMVAULT_FORMAT_VERSION};
use crate::store::{self, StoreError};

/// Errors raised by container operations
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// Bundle does not exist at the given path
    #[error("no container at {0}")]
    NotFound(String),

    /// Path already taken: create over an existing bundle, or a dataset
    /// collision without overwrite
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Write attempted through a read-only handle
    #[error("container is open read-only")]
    ReadOnlyContainer,

    /// Write attempted on a packed archive
    #[error("packed containers are read-only")]
    PackedReadOnly,

    /// No dataset stored at the given path
    #[error("no dataset at {0}")]
    MissingDataset(String),

    /// Container path escapes the bundle or holds empty segments
    #[error("invalid container path: {0}")]
    InvalidPath(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Dataset storage error
    #[error(transparent)]
    StoreError(#[from] StoreError),

    /// Source file conversion error
    #[error(transparent)]
    FormatError(#[from] FormatError),

    /// Packed archive error
    #[error(transparent)]
    ArchiveError(#[from] ArchiveError),

    /// Manifest or metadata serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// How to open a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing container, reads only
    ReadOnly,
    /// Existing container, reads and writes
    ReadWrite,
    /// New empty bundle; fails if the path already exists
    Create,
}

/// One ingested source file, as recorded in the manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceEntry {
    /// Source file stem
    pub name: String,
    /// Source file extension
    #[serde(rename = "type")]
    pub type_tag: String,
    /// RFC 3339 ingestion timestamp
    pub extracted: String,
}

/// Container manifest, stored as `manifest.json` at the bundle root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Container format version
    pub format_version: String,
    /// Random id assigned at creation
    pub container_id: uuid::Uuid,
    /// RFC 3339 creation timestamp
    pub created: String,
    /// Name and version of the writing library
    pub converter: String,
    /// Ingested source files
    pub sources: Vec<SourceEntry>,
}

impl Manifest {
    fn new() -> Self {
        Self {
            format_version: SPMVAULT_FORMAT_VERSION.to_string(),
            container_id: uuid::Uuid::new_v4(),
            created: chrono::Utc::now().to_rfc3339(),
            converter: format!("spmvault {}", env!("CARGO_PKG_VERSION")),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum Backing {
    Directory { root: PathBuf, writable: bool },
    Packed(PackedContainer),
}

/// Handle to an open container
#[derive(Debug)]
pub struct Container {
    backing: Backing,
    manifest: Manifest,
    dirty: bool,
}

impl Container {
    /// Open a container at `path` in the given mode
    ///
    /// A directory opens as a bundle. A file opens as a packed archive, which
    /// only supports [`OpenMode::ReadOnly`].
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Container, ContainerError> {
        let path = path.as_ref();
        match mode {
            OpenMode::Create => Self::create(path),
            OpenMode::ReadOnly | OpenMode::ReadWrite => {
                if path.is_file() {
                    if mode == OpenMode::ReadWrite {
                        return Err(ContainerError::PackedReadOnly);
                    }
                    let packed = PackedContainer::open(path)?;
                    let manifest = serde_json::from_str(packed.manifest_json())?;
                    log::debug!("opened packed container {}", path.display());
                    return Ok(Container {
                        backing: Backing::Packed(packed),
                        manifest,
                        dirty: false,
                    });
                }
                if !path.is_dir() {
                    return Err(ContainerError::NotFound(path.display().to_string()));
                }
                let manifest_path = path.join(MANIFEST_FILE);
                let manifest = serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)?;
                log::debug!("opened bundle {} ({mode:?})", path.display());
                Ok(Container {
                    backing: Backing::Directory {
                        root: path.to_path_buf(),
                        writable: mode == OpenMode::ReadWrite,
                    },
                    manifest,
                    dirty: false,
                })
            }
        }
    }

    /// Create an empty bundle
    fn create(path: &Path) -> Result<Container, ContainerError> {
        if path.exists() {
            return Err(ContainerError::AlreadyExists(path.display().to_string()));
        }
        std::fs::create_dir_all(path)?;
        for dir in [DATA_DIR, METADATA_DIR, PROCESS_DIR] {
            std::fs::create_dir(path.join(dir))?;
        }

        let manifest = Manifest::new();
        let container = Container {
            backing: Backing::Directory {
                root: path.to_path_buf(),
                writable: true,
            },
            manifest,
            dirty: true,
        };
        container.save_manifest()?;
        log::info!("created container {}", path.display());
        Ok(container)
    }

    /// The container manifest
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Whether this handle accepts writes
    pub fn is_writable(&self) -> bool {
        matches!(
            self.backing,
            Backing::Directory { writable: true, .. }
        )
    }

    fn root(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Directory { root, .. } => Some(root),
            Backing::Packed(_) => None,
        }
    }

    fn require_writable(&self) -> Result<&Path, ContainerError> {
        match &self.backing {
            Backing::Directory { root, writable: true } => Ok(root),
            Backing::Directory { writable: false, .. } => Err(ContainerError::ReadOnlyContainer),
            Backing::Packed(_) => Err(ContainerError::PackedReadOnly),
        }
    }

    /// Resolve a container path to a dataset file inside the bundle
    fn dataset_file(root: &Path, path: &DataPath) -> Result<PathBuf, ContainerError> {
        let mut file = root.to_path_buf();
        let mut segments = 0;
        for segment in path.segments() {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(ContainerError::InvalidPath(path.to_string()));
            }
            file.push(segment);
            segments += 1;
        }
        if segments == 0 {
            return Err(ContainerError::InvalidPath(path.to_string()));
        }
        // Append rather than set_extension: channel names may contain dots
        // ("2.5MHz"), and set_extension would truncate at the last one.
        file.as_mut_os_string().push(".parquet");
        Ok(file)
    }

    /// Read a dataset
    pub fn read(&mut self, path: &DataPath) -> Result<Dataset, ContainerError> {
        Ok(self.read_stored(path)?.dataset)
    }

    /// Read a dataset's attribute set
    pub fn attributes(&mut self, path: &DataPath) -> Result<DatasetAttributes, ContainerError> {
        Ok(self.read_stored(path)?.dataset.attributes)
    }

    /// Read a process output's provenance record
    ///
    /// Returns `None` for raw datasets, which carry no provenance.
    pub fn provenance(
        &mut self,
        path: &DataPath,
    ) -> Result<Option<ProvenanceRecord>, ContainerError> {
        Ok(self.read_stored(path)?.provenance)
    }

    pub(crate) fn read_stored(
        &mut self,
        path: &DataPath,
    ) -> Result<store::StoredDataset, ContainerError> {
        match &mut self.backing {
            Backing::Directory { root, .. } => {
                let file = Self::dataset_file(root, path)?;
                if !file.is_file() {
                    return Err(ContainerError::MissingDataset(path.to_string()));
                }
                Ok(store::read_dataset_file(&file)?)
            }
            Backing::Packed(packed) => Ok(packed.read_dataset(path)?),
        }
    }

    /// Write a dataset, failing if the path is already taken
    pub fn write(
        &mut self,
        path: &DataPath,
        array: ArrayData,
        attributes: DatasetAttributes,
    ) -> Result<(), ContainerError> {
        self.write_with(path, array, attributes, false)
    }

    /// Write a dataset, optionally overwriting an existing one
    pub fn write_with(
        &mut self,
        path: &DataPath,
        array: ArrayData,
        attributes: DatasetAttributes,
        overwrite: bool,
    ) -> Result<(), ContainerError> {
        let root = self.require_writable()?;
        let file = Self::dataset_file(root, path)?;
        if file.exists() && !overwrite {
            return Err(ContainerError::AlreadyExists(path.to_string()));
        }
        let dataset = Dataset::new(array, attributes);
        store::write_dataset_file(&file, &dataset, None)?;
        log::debug!("wrote dataset {path}");
        Ok(())
    }

    /// Write a process output together with its provenance record
    pub(crate) fn write_output(
        &mut self,
        path: &DataPath,
        dataset: &Dataset,
        provenance: &ProvenanceRecord,
        overwrite: bool,
    ) -> Result<(), ContainerError> {
        let root = self.require_writable()?;
        let file = Self::dataset_file(root, path)?;
        if file.exists() && !overwrite {
            return Err(ContainerError::AlreadyExists(path.to_string()));
        }
        store::write_dataset_file(&file, dataset, Some(provenance))?;
        log::debug!("wrote process output {path}");
        Ok(())
    }

    /// Update one attribute of a stored dataset
    ///
    /// The `name`, `size`, `offset`, and `unit` attributes update their typed
    /// fields; any other key lands in the extras map. The dataset file is
    /// rewritten in place, preserving array values and provenance.
    pub fn set_attribute(
        &mut self,
        path: &DataPath,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ContainerError> {
        self.require_writable()?;
        let mut stored = self.read_stored(path)?;

        let attributes = &mut stored.dataset.attributes;
        match key {
            "name" => attributes.name = serde_json::from_value(value)?,
            "size" => attributes.size = serde_json::from_value(value)?,
            "offset" => attributes.offset = serde_json::from_value(value)?,
            "unit" => attributes.unit = serde_json::from_value(value)?,
            "shape" => return Err(ContainerError::InvalidPath("shape is derived".to_string())),
            _ => {
                attributes.extra.insert(key.to_string(), value);
            }
        }

        let root = self.require_writable()?;
        let file = Self::dataset_file(root, path)?;
        store::write_dataset_file(&file, &stored.dataset, stored.provenance.as_ref())?;
        Ok(())
    }

    /// Delete a stored dataset
    pub fn delete(&mut self, path: &DataPath) -> Result<(), ContainerError> {
        let root = self.require_writable()?;
        let file = Self::dataset_file(root, path)?;
        if !file.is_file() {
            return Err(ContainerError::MissingDataset(path.to_string()));
        }
        std::fs::remove_file(file)?;
        Ok(())
    }

    /// Whether a dataset is stored at `path`
    pub fn contains(&mut self, path: &DataPath) -> bool {
        match &mut self.backing {
            Backing::Directory { root, .. } => Self::dataset_file(root, path)
                .map(|f| f.is_file())
                .unwrap_or(false),
            Backing::Packed(packed) => packed.contains(path),
        }
    }

    /// Ingest a source file through the converter matching its extension
    ///
    /// Writes one dataset per channel under `data/<stem>/`, the raw source
    /// metadata to `metadata/<stem>.json`, and records the source in the
    /// manifest. Ingestion is all-or-nothing: on failure nothing of the file
    /// remains in the bundle. Returns the paths of the ingested channels.
    pub fn extract_data(
        &mut self,
        source: impl AsRef<Path>,
    ) -> Result<Vec<DataPath>, ContainerError> {
        let source = source.as_ref();
        let root = self.require_writable()?.to_path_buf();

        let extracted = formats::extract(source)?;
        if self
            .manifest
            .sources
            .iter()
            .any(|entry| entry.name == extracted.source_name)
        {
            return Err(ContainerError::AlreadyExists(extracted.source_name));
        }

        let mut written = Vec::new();
        let result = self.ingest(&root, &extracted, &mut written);
        if result.is_err() {
            // Roll back only what this ingest wrote; datasets that were
            // already in the bundle stay untouched.
            for file in &written {
                let _ = std::fs::remove_file(file);
            }
            // Non-recursive remove: succeeds only when the ingest was the
            // sole occupant of the source directory.
            let _ = std::fs::remove_dir(root.join(DATA_DIR).join(&extracted.source_name));
            return result;
        }

        self.manifest.sources.push(SourceEntry {
            name: extracted.source_name.clone(),
            type_tag: extracted.type_tag.clone(),
            extracted: chrono::Utc::now().to_rfc3339(),
        });
        self.dirty = true;
        self.save_manifest()?;

        log::info!(
            "ingested {} ({} channels)",
            source.display(),
            extracted.channels.len()
        );
        result
    }

    fn ingest(
        &mut self,
        root: &Path,
        extracted: &formats::ExtractedFile,
        written: &mut Vec<PathBuf>,
    ) -> Result<Vec<DataPath>, ContainerError> {
        let mut paths = Vec::with_capacity(extracted.channels.len());
        for channel in &extracted.channels {
            let path = DataPath::new(format!(
                "{DATA_DIR}/{}/{}",
                extracted.source_name, channel.name
            ));
            let file = Self::dataset_file(root, &path)?;
            if file.exists() {
                return Err(ContainerError::AlreadyExists(path.to_string()));
            }
            let dataset = Dataset::new(channel.array.clone(), channel.attributes.clone());
            written.push(file.clone());
            store::write_dataset_file(&file, &dataset, None)?;
            paths.push(path);
        }

        let metadata_file = root
            .join(METADATA_DIR)
            .join(format!("{}.json", extracted.source_name));
        written.push(metadata_file.clone());
        std::fs::write(
            metadata_file,
            serde_json::to_string_pretty(&extracted.metadata)?,
        )?;
        Ok(paths)
    }

    /// Read back the raw source metadata recorded for an ingested file
    pub fn source_metadata(
        &mut self,
        source_name: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>, ContainerError> {
        match &mut self.backing {
            Backing::Directory { root, .. } => {
                let file = root.join(METADATA_DIR).join(format!("{source_name}.json"));
                if !file.is_file() {
                    return Err(ContainerError::MissingDataset(source_name.to_string()));
                }
                Ok(serde_json::from_str(&std::fs::read_to_string(file)?)?)
            }
            Backing::Packed(packed) => Ok(serde_json::from_str(
                &packed.read_metadata_json(source_name)?,
            )?),
        }
    }

    /// All dataset paths in the container, sorted
    pub fn dataset_paths(&mut self) -> Result<Vec<DataPath>, ContainerError> {
        match &mut self.backing {
            Backing::Directory { root, .. } => {
                let mut paths = Vec::new();
                for dir in [DATA_DIR, PROCESS_DIR] {
                    collect_datasets(&root.join(dir), dir, &mut paths)?;
                }
                paths.sort();
                Ok(paths)
            }
            Backing::Packed(packed) => Ok(packed.dataset_paths()),
        }
    }

    /// Dataset paths matching a glob-style pattern
    ///
    /// `*` matches any run of characters (including `/`), `?` a single one.
    pub fn find_paths(&mut self, pattern: &str) -> Result<Vec<DataPath>, ContainerError> {
        let mut paths = self.dataset_paths()?;
        paths.retain(|path| glob_match(pattern, path.as_str()));
        Ok(paths)
    }

    /// Next free process folder prefix, zero-padded
    pub(crate) fn next_process_number(&self) -> Result<String, ContainerError> {
        let root = self.require_writable()?;
        let process_dir = root.join(PROCESS_DIR);
        let mut highest = 0u32;
        if process_dir.is_dir() {
            for entry in std::fs::read_dir(process_dir)? {
                let name = entry?.file_name();
                let name = name.to_string_lossy();
                if let Some(number) = name.split('-').next().and_then(|n| n.parse::<u32>().ok()) {
                    highest = highest.max(number);
                }
            }
        }
        Ok(format!("{:03}", highest + 1))
    }

    fn save_manifest(&self) -> Result<(), ContainerError> {
        let Some(root) = self.root() else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(root.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Flush the manifest and consume the handle
    pub fn close(mut self) -> Result<(), ContainerError> {
        if self.dirty && self.is_writable() {
            self.save_manifest()?;
        }
        self.dirty = false;
        Ok(())
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.dirty && self.is_writable() {
            if let Err(e) = self.save_manifest() {
                log::warn!("failed to flush manifest on drop: {e}");
            }
        }
    }
}

fn collect_datasets(
    dir: &Path,
    prefix: &str,
    paths: &mut Vec<DataPath>,
) -> Result<(), ContainerError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let child = entry.path();
        if child.is_dir() {
            collect_datasets(&child, &format!("{prefix}/{name}"), paths)?;
        } else if let Some(stem) = name.strip_suffix(".parquet") {
            paths.push(DataPath::new(format!("{prefix}/{stem}")));
        }
    }
    Ok(())
}

/// Minimal glob matcher: `*` any run (including `/`), `?` one character
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    fn inner(pattern: &[char], text: &[char]) -> bool {
        match pattern.split_first() {
            None => text.is_empty(),
            Some(('*', rest)) => {
                (0..=text.len()).any(|skip| inner(rest, &text[skip..]))
            }
            Some(('?', rest)) => text
                .split_first()
                .is_some_and(|(_, text)| inner(rest, text)),
            Some((literal, rest)) => text
                .split_first()
                .is_some_and(|(first, text)| first == literal && inner(rest, text)),
        }
    }

    inner(&pattern, &text)
}
