//! # Format Converters
//!
//! Format-specific parsers that turn proprietary instrument files into the
//! uniform ingestion representation consumed by the container:
//!
//! - [`gsf`] - Gwyddion Simple Field 1.0 (`.gsf`)
//! - [`ibw`] - Igor Binary Wave from Asylum AFMs (`.ibw`)
//! - [`ardf`] - Asylum Research Data File (`.ARDF`)
//! - [`nanoscope`] - Bruker/Veeco Nanoscope (`.000`, `.001`, ...)
//! - [`csvfile`] - delimited text tables (`.csv`, `.tsv`)
//! - [`xrdml`] - PANalytical XRDML diffraction scans (`.xrdml`)
//!
//! Converters are pure and stateless: bytes in, [`ExtractedFile`] out. Selection
//! is by file extension via [`Format::detect`]. A malformed file fails with a
//! parse error naming it; nothing is ingested partially.

use std::collections::BTreeMap;
use std::path::Path;

use crate::dataset::{ArrayData, DatasetAttributes, DatasetError};

pub mod ardf;
pub mod csvfile;
pub mod gsf;
pub mod ibw;
pub mod nanoscope;
pub mod xrdml;

/// Errors raised by format converters
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// I/O error while reading the source file
    #[error("I/O error reading {file}: {source}")]
    IoError {
        /// Offending file
        file: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// No converter matches the file extension
    #[error("no converter for {0}")]
    UnsupportedFormat(String),

    /// Malformed or unrecognized file content
    #[error("failed to parse {file}: {message}")]
    ParseError {
        /// Offending file
        file: String,
        /// What went wrong
        message: String,
    },

    /// Extracted values do not form a valid array
    #[error(transparent)]
    DatasetError(#[from] DatasetError),
}

impl FormatError {
    pub(crate) fn parse(file: &Path, message: impl Into<String>) -> Self {
        Self::ParseError {
            file: file.display().to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn io(file: &Path, source: std::io::Error) -> Self {
        Self::IoError {
            file: file.display().to_string(),
            source,
        }
    }
}

/// One extracted channel: a named array plus its attributes
#[derive(Debug, Clone)]
pub struct Channel {
    /// Channel name (e.g. `HeightTrace`)
    pub name: String,
    /// The channel array
    pub array: ArrayData,
    /// Attribute set synthesized from the source header
    pub attributes: DatasetAttributes,
}

/// Uniform ingestion representation produced by every converter
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Source file stem, used as the container entry name
    pub source_name: String,
    /// Source file extension, recorded as the entry type
    pub type_tag: String,
    /// All channels found in the file
    pub channels: Vec<Channel>,
    /// Unmodified source metadata as key-value pairs
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Supported source formats, selected by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Gwyddion Simple Field
    Gsf,
    /// Igor Binary Wave
    Ibw,
    /// Asylum Research Data File
    Ardf,
    /// Nanoscope (numeric extensions such as `.000`)
    Nanoscope,
    /// Delimited text table
    Csv,
    /// PANalytical XRDML
    Xrdml,
}

impl Format {
    /// Detect the format of a file from its extension
    pub fn detect(path: &Path) -> Option<Format> {
        let ext = path.extension()?.to_str()?;
        let lower = ext.to_ascii_lowercase();
        match lower.as_str() {
            "gsf" => Some(Format::Gsf),
            "ibw" => Some(Format::Ibw),
            "ardf" => Some(Format::Ardf),
            "csv" | "tsv" => Some(Format::Csv),
            "xrdml" => Some(Format::Xrdml),
            _ if lower.len() == 3 && lower.bytes().all(|b| b.is_ascii_digit()) => {
                Some(Format::Nanoscope)
            }
            _ => None,
        }
    }

    /// Short name for log messages
    pub fn name(&self) -> &'static str {
        match self {
            Format::Gsf => "gsf",
            Format::Ibw => "ibw",
            Format::Ardf => "ardf",
            Format::Nanoscope => "nanoscope",
            Format::Csv => "csv",
            Format::Xrdml => "xrdml",
        }
    }
}

/// Parse a source file with the converter matching its extension
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let format = Format::detect(path)
        .ok_or_else(|| FormatError::UnsupportedFormat(path.display().to_string()))?;
    log::debug!("extracting {} as {}", path.display(), format.name());

    match format {
        Format::Gsf => gsf::extract(path),
        Format::Ibw => ibw::extract(path),
        Format::Ardf => ardf::extract(path),
        Format::Nanoscope => nanoscope::extract(path),
        Format::Csv => csvfile::extract(path),
        Format::Xrdml => xrdml::extract(path),
    }
}

/// Interpret a raw metadata string as the most specific JSON value
///
/// Integers parse to numbers, floats to numbers, everything else stays a
/// string. Converters run every header value through this before storing it.
pub(crate) fn metadata_value(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return serde_json::json!(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return serde_json::json!(float);
        }
    }
    serde_json::Value::String(trimmed.to_string())
}

/// Source file stem and extension, as recorded in the manifest
pub(crate) fn source_identity(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    (stem, ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(Format::detect(&PathBuf::from("scan.gsf")), Some(Format::Gsf));
        assert_eq!(Format::detect(&PathBuf::from("scan.ibw")), Some(Format::Ibw));
        assert_eq!(Format::detect(&PathBuf::from("map.ARDF")), Some(Format::Ardf));
        assert_eq!(Format::detect(&PathBuf::from("map.ardf")), Some(Format::Ardf));
        assert_eq!(
            Format::detect(&PathBuf::from("scan.000")),
            Some(Format::Nanoscope)
        );
        assert_eq!(
            Format::detect(&PathBuf::from("scan.042")),
            Some(Format::Nanoscope)
        );
        assert_eq!(Format::detect(&PathBuf::from("table.tsv")), Some(Format::Csv));
        assert_eq!(
            Format::detect(&PathBuf::from("scan.xrdml")),
            Some(Format::Xrdml)
        );
        assert_eq!(Format::detect(&PathBuf::from("scan.txt")), None);
        assert_eq!(Format::detect(&PathBuf::from("noext")), None);
    }

    #[test]
    fn test_metadata_value_coercion() {
        assert_eq!(metadata_value("42"), serde_json::json!(42));
        assert_eq!(metadata_value(" 2.5e-7 "), serde_json::json!(2.5e-7));
        assert_eq!(metadata_value("Height"), serde_json::json!("Height"));
    }

    #[test]
    fn test_unsupported_extension_errors() {
        let err = extract(&PathBuf::from("scan.bin")).unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedFormat(_)));
    }
}
