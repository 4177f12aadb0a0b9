//! Delimited text table parser (`.csv`, `.tsv`)
//!
//! The first row names the columns; every later cell must be numeric. Each
//! column becomes a 1-D channel.

use std::collections::BTreeMap;
use std::path::Path;

use crate::dataset::{ArrayData, DatasetAttributes};

use super::{source_identity, Channel, ExtractedFile, FormatError};

/// Parse a delimited table into one 1-D channel per column
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let delimiter = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| FormatError::parse(path, e.to_string()))?;

    let names: Vec<String> = reader
        .headers()
        .map_err(|e| FormatError::parse(path, e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err(FormatError::parse(path, "empty table"));
    }

    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); names.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| FormatError::parse(path, e.to_string()))?;
        if record.len() != names.len() {
            return Err(FormatError::parse(
                path,
                format!(
                    "row {} holds {} cells, header names {} columns",
                    row + 2,
                    record.len(),
                    names.len()
                ),
            ));
        }
        for (column, cell) in columns.iter_mut().zip(record.iter()) {
            let value: f64 = cell.parse().map_err(|_| {
                FormatError::parse(path, format!("non-numeric cell '{cell}' in row {}", row + 2))
            })?;
            column.push(value);
        }
    }

    let (source_name, type_tag) = source_identity(path);
    let rows = columns.first().map(Vec::len).unwrap_or(0);

    let mut channels = Vec::with_capacity(names.len());
    for (name, values) in names.iter().zip(columns) {
        let array = ArrayData::new(vec![values.len()], values)?;
        let attributes = DatasetAttributes::new(name, array.shape());
        channels.push(Channel {
            name: name.clone(),
            array,
            attributes,
        });
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("columns".to_string(), serde_json::json!(names));
    metadata.insert("rows".to_string(), serde_json::json!(rows));

    Ok(ExtractedFile {
        source_name,
        type_tag,
        channels,
        metadata,
    })
}
