//! # Dataset Types
//!
//! Core in-memory representation of a stored dataset: an N-dimensional array of
//! `f64` values in row-major order plus its attribute set.
//!
//! Arrays are kept as a flat `Vec<f64>` with an explicit shape rather than a
//! nested structure, matching the columnar layout they are persisted in. The
//! attribute set carries the five required keys (`name`, `shape`, `size`,
//! `offset`, `unit`) along with any converter-specific extras.

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{Array, Float64Array, Float64Builder};
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};

use crate::schema::{columns, create_dataset_schema_arc};

/// Errors produced when constructing or reassembling arrays
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// Shape does not describe the number of values provided
    #[error("shape {shape:?} describes {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Offending shape
        shape: Vec<usize>,
        /// Element count the shape describes
        expected: usize,
        /// Element count actually provided
        actual: usize,
    },

    /// Ragged row data cannot form a rectangular array
    #[error("row {row} has {actual} elements, expected {expected}")]
    RaggedRows {
        /// Index of the offending row
        row: usize,
        /// Expected row length
        expected: usize,
        /// Actual row length
        actual: usize,
    },

    /// Arrow conversion error
    #[error("Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),

    /// Record batch is missing the values column
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// Attribute JSON (de)serialization error
    #[error("attribute JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// N-dimensional array of `f64` values, flattened row-major
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayData {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl ArrayData {
    /// Create an array from a shape and row-major values
    pub fn new(shape: Vec<usize>, values: Vec<f64>) -> Result<Self, DatasetError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(DatasetError::ShapeMismatch {
                shape,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self { shape, values })
    }

    /// Create a 1-D array
    pub fn from_vec(values: Vec<f64>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    /// Create a 2-D array from equal-length rows
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, DatasetError> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut values = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_cols {
                return Err(DatasetError::RaggedRows {
                    row: i,
                    expected: n_cols,
                    actual: row.len(),
                });
            }
            values.extend(row);
        }
        Ok(Self {
            shape: vec![n_rows, n_cols],
            values,
        })
    }

    /// Create a zero-filled array of the given shape
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            values: vec![0.0; len],
        }
    }

    /// Array shape (element counts per axis)
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when the array holds no elements
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row-major flattened values
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Consume the array, returning the flattened values
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    /// Element at a multi-dimensional index, `None` when out of bounds
    pub fn get(&self, index: &[usize]) -> Option<f64> {
        if index.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0usize;
        for (&idx, &dim) in index.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return None;
            }
            flat = flat * dim + idx;
        }
        self.values.get(flat).copied()
    }

    /// Row `i` of a 2-D array as a slice, `None` for other ranks
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        if self.shape.len() != 2 || i >= self.shape[0] {
            return None;
        }
        let cols = self.shape[1];
        Some(&self.values[i * cols..(i + 1) * cols])
    }

    /// Vertically flip a 2-D array (image orientation fix for ibw waves)
    pub fn flip_rows(&self) -> ArrayData {
        if self.shape.len() != 2 {
            return self.clone();
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut values = Vec::with_capacity(self.values.len());
        for r in (0..rows).rev() {
            values.extend_from_slice(&self.values[r * cols..(r + 1) * cols]);
        }
        ArrayData {
            shape: self.shape.clone(),
            values,
        }
    }

    /// Transpose a 2-D array; other ranks are returned unchanged
    pub fn transpose(&self) -> ArrayData {
        if self.shape.len() != 2 {
            return self.clone();
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut values = vec![0.0; self.values.len()];
        for r in 0..rows {
            for c in 0..cols {
                values[c * rows + r] = self.values[r * cols + c];
            }
        }
        ArrayData {
            shape: vec![cols, rows],
            values,
        }
    }

    /// Convert to a single-column record batch for Parquet storage
    pub fn to_record_batch(&self) -> Result<RecordBatch, DatasetError> {
        let schema = create_dataset_schema_arc();
        let mut builder = Float64Builder::with_capacity(self.values.len());
        builder.append_slice(&self.values);
        let batch = RecordBatch::try_new(schema, vec![Arc::new(builder.finish())])?;
        Ok(batch)
    }

    /// Reassemble an array from record batches and its stored shape
    pub fn from_record_batches(
        batches: &[RecordBatch],
        shape: Vec<usize>,
    ) -> Result<Self, DatasetError> {
        let mut values = Vec::with_capacity(shape.iter().product());
        for batch in batches {
            let column = batch
                .column_by_name(columns::VALUES)
                .ok_or_else(|| DatasetError::ColumnNotFound(columns::VALUES.to_string()))?;
            let column = column
                .as_any()
                .downcast_ref::<Float64Array>()
                .ok_or_else(|| DatasetError::ColumnNotFound(columns::VALUES.to_string()))?;
            values.extend(column.values().iter().copied());
        }
        Self::new(shape, values)
    }
}

/// Attribute set attached to every stored dataset
///
/// The five required attributes are `name`, `shape`, `size` (physical extent
/// per axis), `offset` (physical origin per axis), and `unit` (one unit string
/// per axis plus the value unit). Converter-specific extras are preserved in
/// `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetAttributes {
    /// Channel or output name
    pub name: String,

    /// Element counts per axis
    pub shape: Vec<usize>,

    /// Physical extent per axis
    pub size: Vec<f64>,

    /// Physical origin per axis
    pub offset: Vec<f64>,

    /// Unit strings: one per axis, last entry for the stored values
    pub unit: Vec<String>,

    /// Converter-specific extra attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DatasetAttributes {
    /// Create an attribute set with defaulted physical fields
    ///
    /// `size` and `offset` default to zero per axis and `unit` to `"unknown"`;
    /// converters overwrite what their headers provide.
    pub fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            size: vec![0.0; shape.len()],
            offset: vec![0.0; shape.len()],
            unit: vec!["unknown".to_string()],
            extra: BTreeMap::new(),
        }
    }

    /// Set the physical extent per axis
    pub fn with_size(mut self, size: Vec<f64>) -> Self {
        self.size = size;
        self
    }

    /// Set the physical origin per axis
    pub fn with_offset(mut self, offset: Vec<f64>) -> Self {
        self.offset = offset;
        self
    }

    /// Set the unit strings
    pub fn with_unit(mut self, unit: Vec<String>) -> Self {
        self.unit = unit;
        self
    }

    /// Attach a converter-specific extra attribute
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Serialize to JSON for the Parquet footer
    pub fn to_json(&self) -> Result<String, DatasetError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from footer JSON
    pub fn from_json(json: &str) -> Result<Self, DatasetError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A stored dataset: array plus attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// The array values
    pub array: ArrayData,
    /// The attribute set
    pub attributes: DatasetAttributes,
}

impl Dataset {
    /// Pair an array with attributes, syncing the shape attribute
    pub fn new(array: ArrayData, mut attributes: DatasetAttributes) -> Self {
        attributes.shape = array.shape().to_vec();
        Self { array, attributes }
    }

    /// Build a dataset with defaulted attributes from a name and array
    pub fn with_name(name: impl Into<String>, array: ArrayData) -> Self {
        let attributes = DatasetAttributes::new(name, array.shape());
        Self { array, attributes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_shape_mismatch() {
        let err = ArrayData::new(vec![2, 3], vec![1.0; 5]).unwrap_err();
        assert!(matches!(err, DatasetError::ShapeMismatch { expected: 6, actual: 5, .. }));
    }

    #[test]
    fn test_from_rows() {
        let array = ArrayData::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array.get(&[1, 0]), Some(3.0));
        assert_eq!(array.get(&[2, 0]), None);
    }

    #[test]
    fn test_from_rows_rejects_ragged() {
        let err = ArrayData::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, DatasetError::RaggedRows { row: 1, .. }));
    }

    #[test]
    fn test_flip_rows() {
        let array = ArrayData::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let flipped = array.flip_rows();
        assert_eq!(flipped.values(), &[3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_transpose() {
        let array = ArrayData::new(vec![2, 3], (0..6).map(f64::from).collect()).unwrap();
        let t = array.transpose();
        assert_eq!(t.shape(), &[3, 2]);
        assert_eq!(t.get(&[2, 1]), Some(5.0));
    }

    #[test]
    fn test_record_batch_round_trip() {
        let array = ArrayData::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let batch = array.to_record_batch().unwrap();
        assert_eq!(batch.num_rows(), 4);
        let back = ArrayData::from_record_batches(&[batch], vec![2, 2]).unwrap();
        assert_eq!(back, array);
    }

    #[test]
    fn test_attributes_json_round_trip() {
        let attrs = DatasetAttributes::new("HeightTrace", &[256, 256])
            .with_size(vec![5e-6, 5e-6])
            .with_offset(vec![0.0, 1e-6])
            .with_unit(vec!["m".into(), "m".into(), "m".into()])
            .with_extra("scale_m_per_px", serde_json::json!(1.953e-8));
        let json = attrs.to_json().unwrap();
        let back = DatasetAttributes::from_json(&json).unwrap();
        assert_eq!(back, attrs);
    }

    #[test]
    fn test_dataset_syncs_shape() {
        let array = ArrayData::from_vec(vec![1.0, 2.0, 3.0]);
        let attrs = DatasetAttributes::new("counts", &[99]);
        let dataset = Dataset::new(array, attrs);
        assert_eq!(dataset.attributes.shape, vec![3]);
    }
}
