//! # spmvault Schema Definition
//!
//! This module defines the on-disk layout constants and the Apache Arrow schema
//! used for dataset files inside a spmvault bundle.
//!
//! ## Bundle layout
//!
//! ```text
//! scan.spmvault/
//! ├── manifest.json                    # format version, container id, source entries
//! ├── metadata/<source>.json           # unmodified source metadata blob
//! ├── data/<source>/<channel>.parquet  # raw channels, one dataset per file
//! └── process/NNN-<op>/<name>.parquet  # derived datasets with provenance
//! ```
//!
//! ## Dataset files
//!
//! Every dataset is a single-column Parquet file: the N-dimensional array is
//! flattened row-major into a `values: Float64` column. The array shape and the
//! physical attributes live in the Parquet footer key-value metadata, so any
//! Parquet-capable tool can open a channel and reconstruct it:
//!
//! | Footer key | Content |
//! |------------|---------|
//! | `spmvault:format_version` | format version string |
//! | `spmvault:attributes` | JSON `DatasetAttributes` (name, shape, size, offset, unit) |
//! | `spmvault:provenance` | JSON provenance record (process outputs only) |

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};

/// spmvault format version - follows semantic versioning
pub const SPMVAULT_FORMAT_VERSION: &str = "1.0.0";

/// File extension for spmvault bundles and packed containers
pub const SPMVAULT_EXTENSION: &str = "spmvault";

/// MIME type for packed spmvault containers
pub const SPMVAULT_MIMETYPE: &str = "application/vnd.spmvault";

/// Metadata key for format version in the Parquet footer
pub const KEY_FORMAT_VERSION: &str = "spmvault:format_version";

/// Metadata key for dataset attributes in the Parquet footer
pub const KEY_ATTRIBUTES: &str = "spmvault:attributes";

/// Metadata key for the provenance record in the Parquet footer
pub const KEY_PROVENANCE: &str = "spmvault:provenance";

/// Name of the bundle manifest file
pub const MANIFEST_FILE: &str = "manifest.json";

/// Top-level bundle directory holding raw channels
pub const DATA_DIR: &str = "data";

/// Top-level bundle directory holding raw source metadata blobs
pub const METADATA_DIR: &str = "metadata";

/// Top-level bundle directory holding derived datasets
pub const PROCESS_DIR: &str = "process";

/// Column names for the dataset file schema
pub mod columns {
    /// Row-major flattened array values
    pub const VALUES: &str = "values";
}

/// Create the Arrow schema for a dataset file
///
/// A dataset file stores exactly one flattened array; the shape needed to
/// reconstruct it is carried in the footer attributes, not in the schema.
pub fn create_dataset_schema() -> Schema {
    Schema::new(vec![Field::new(columns::VALUES, DataType::Float64, false)])
}

/// Create the dataset schema wrapped in an `Arc` for writer reuse
pub fn create_dataset_schema_arc() -> Arc<Schema> {
    Arc::new(create_dataset_schema())
}
