//! # Dataset File Storage
//!
//! Reads and writes the individual dataset files inside a bundle. Each dataset
//! is one Parquet file: a single `values: Float64` column holding the row-major
//! flattened array, with the attribute set (and, for process outputs, the
//! provenance record) JSON-encoded in the footer key-value metadata.
//!
//! Files are written with ZSTD compression; arrays compress well and the files
//! stay self-describing for any Parquet-capable tool.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::metadata::KeyValue;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::file::reader::ChunkReader;

use crate::dataset::{ArrayData, Dataset, DatasetAttributes, DatasetError};
use crate::provenance::{ProvenanceError, ProvenanceRecord};
use crate::schema::{
    create_dataset_schema_arc, KEY_ATTRIBUTES, KEY_FORMAT_VERSION, KEY_PROVENANCE,
    SPMVAULT_FORMAT_VERSION,
};

/// Errors from dataset file storage
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Parquet error
    #[error("Parquet error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),

    /// Arrow error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Array or attribute error
    #[error(transparent)]
    DatasetError(#[from] DatasetError),

    /// Provenance serialization error
    #[error(transparent)]
    ProvenanceError(#[from] ProvenanceError),

    /// Footer is missing the attribute metadata key
    #[error("dataset file has no `{KEY_ATTRIBUTES}` footer entry")]
    MissingAttributes,
}

/// A dataset read back from storage, with its footer companions
#[derive(Debug, Clone)]
pub struct StoredDataset {
    /// The dataset (array + attributes)
    pub dataset: Dataset,
    /// Provenance record, present on process outputs only
    pub provenance: Option<ProvenanceRecord>,
    /// Format version recorded at write time
    pub format_version: Option<String>,
}

fn writer_properties(
    attributes: &DatasetAttributes,
    provenance: Option<&ProvenanceRecord>,
) -> Result<WriterProperties, StoreError> {
    let mut kv_metadata = vec![
        KeyValue {
            key: KEY_FORMAT_VERSION.to_string(),
            value: Some(SPMVAULT_FORMAT_VERSION.to_string()),
        },
        KeyValue {
            key: KEY_ATTRIBUTES.to_string(),
            value: Some(attributes.to_json()?),
        },
    ];
    if let Some(record) = provenance {
        kv_metadata.push(KeyValue {
            key: KEY_PROVENANCE.to_string(),
            value: Some(record.to_json()?),
        });
    }

    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_statistics_enabled(EnabledStatistics::Chunk)
        .set_key_value_metadata(Some(kv_metadata))
        .build();
    Ok(props)
}

/// Write a dataset to any `Write` sink as a self-describing Parquet file
pub fn write_dataset<W: Write + Send>(
    sink: W,
    dataset: &Dataset,
    provenance: Option<&ProvenanceRecord>,
) -> Result<(), StoreError> {
    let schema = create_dataset_schema_arc();
    let props = writer_properties(&dataset.attributes, provenance)?;
    let mut writer = ArrowWriter::try_new(sink, schema, Some(props))?;

    let batch = dataset.array.to_record_batch()?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Write a dataset to a file path, creating parent directories as needed
pub fn write_dataset_file(
    path: &Path,
    dataset: &Dataset,
    provenance: Option<&ProvenanceRecord>,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    write_dataset(file, dataset, provenance)
}

/// Read a dataset from any Parquet chunk source (file or in-memory bytes)
pub fn read_dataset_from<R: ChunkReader + 'static>(source: R) -> Result<StoredDataset, StoreError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(source)?;

    let mut attributes: Option<DatasetAttributes> = None;
    let mut provenance: Option<ProvenanceRecord> = None;
    let mut format_version: Option<String> = None;

    if let Some(kv_list) = builder.metadata().file_metadata().key_value_metadata() {
        for kv in kv_list {
            let Some(value) = kv.value.as_deref() else {
                continue;
            };
            match kv.key.as_str() {
                KEY_ATTRIBUTES => attributes = Some(DatasetAttributes::from_json(value)?),
                KEY_PROVENANCE => provenance = Some(ProvenanceRecord::from_json(value)?),
                KEY_FORMAT_VERSION => format_version = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let attributes = attributes.ok_or(StoreError::MissingAttributes)?;

    let reader = builder.build()?;
    let batches: Vec<_> = reader.collect::<Result<_, _>>()?;
    let array = ArrayData::from_record_batches(&batches, attributes.shape.clone())?;

    Ok(StoredDataset {
        dataset: Dataset { array, attributes },
        provenance,
        format_version,
    })
}

/// Read a dataset from a file path
pub fn read_dataset_file(path: &Path) -> Result<StoredDataset, StoreError> {
    let file = File::open(path)?;
    read_dataset_from(file)
}
