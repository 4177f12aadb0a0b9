//! # spmvault - A Uniform Container for Scanning-Probe-Microscopy Data
//!
//! `spmvault` converts proprietary scanning-probe-microscopy raw files into a
//! uniform hierarchical container and applies numeric operations to the stored
//! arrays while recording full provenance: which operation, with which
//! arguments, produced which derived dataset.
//!
//! ## Key Features
//!
//! - **Bundle Architecture**: Directory-based container with one Parquet file
//!   per channel, a JSON manifest, and the unmodified source metadata kept
//!   alongside the data.
//!
//! - **Multi-Vendor Ingestion**: Converters for Igor Binary Wave (`.ibw`),
//!   Gwyddion Simple Field (`.gsf`), Asylum Research (`.ARDF`), Bruker/Veeco
//!   Nanoscope (`.000`-family), delimited tables, and PANalytical `.xrdml`.
//!
//! - **Provenance Tracking**: Every derived dataset carries a record of the
//!   operation, its argument references, and its parameters, embedded in the
//!   Parquet footer and readable back verbatim.
//!
//! - **Efficient Storage**: Apache Parquet with ZSTD compression; every
//!   dataset stays readable by any Parquet-capable tool.
//!
//! - **Archival Packing**: A bundle packs into a single ZIP file with a
//!   leading `mimetype` entry; packed containers open read-only with datasets
//!   read straight from the Stored entries.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spmvault::prelude::*;
//!
//! // Create a container and ingest a raw file
//! let mut container = Container::open("scan.spmvault", OpenMode::Create)?;
//! let channels = container.extract_data("scan01.ibw")?;
//!
//! // Level the first channel, recording provenance
//! let inputs = vec![ApplyInput::Path(channels[0].clone())];
//! let leveled = container.apply(
//!     "plane_level",
//!     spmvault::processing::plane_level,
//!     &inputs,
//!     &["leveled"],
//!     &ApplyParams::new(),
//! )?;
//!
//! // Read back the result and its provenance
//! let dataset = container.read(&leveled[0])?;
//! let record = container.provenance(&leveled[0])?;
//! container.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! This creates a directory structure:
//! ```text
//! scan.spmvault/
//! ├── manifest.json                        # container id, sources, timestamps
//! ├── metadata/scan01.json                 # unmodified source metadata
//! ├── data/scan01/HeightTrace.parquet      # raw channels
//! └── process/001-plane_level/leveled.parquet
//! ```
//!
//! ## Reading with Other Tools
//!
//! Every dataset is a plain single-column Parquet file:
//!
//! ```python
//! # Python
//! import pyarrow.parquet as pq
//! table = pq.read_table("scan.spmvault/data/scan01/HeightTrace.parquet")
//! ```
//!
//! The array shape, physical size, offset, and units live in the footer
//! key-value metadata under `spmvault:attributes`; derived datasets add
//! `spmvault:provenance`.
//!
//! ## Architecture
//!
//! - [`container`]: container handle, manifest, ingestion, path lookup
//! - [`apply`]: apply engine and provenance recording
//! - [`formats`]: per-vendor format converters
//! - [`dataset`]: arrays, attributes, Arrow conversion
//! - [`store`]: Parquet dataset files with footer metadata
//! - [`archive`]: packed single-file containers
//! - [`processing`]: ready-made operations (plane level, flatten, ...)

// Documentation lints - enforce complete documentation for publication
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

pub mod apply;
pub mod archive;
pub mod container;
pub mod dataset;
pub mod formats;
pub mod processing;
pub mod provenance;
pub mod reference;
pub mod schema;
pub mod store;

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::apply::{ApplyError, ApplyInput, ApplyParams, ResolvedInput};
    pub use crate::archive::{pack, ArchiveError, PackedContainer};
    pub use crate::container::{Container, ContainerError, Manifest, OpenMode, SourceEntry};
    pub use crate::dataset::{ArrayData, Dataset, DatasetAttributes, DatasetError};
    pub use crate::formats::{ExtractedFile, Format, FormatError};
    pub use crate::provenance::{ArgumentRef, ProvenanceRecord};
    pub use crate::reference::DataPath;
    pub use crate::schema::{SPMVAULT_FORMAT_VERSION, SPMVAULT_MIMETYPE};
    pub use crate::store::StoredDataset;
}
