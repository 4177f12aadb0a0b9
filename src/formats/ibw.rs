//! Igor Binary Wave (version 5) parser
//!
//! Asylum Research AFMs save scans as Igor Pro waves: a 64-byte bin header, a
//! 320-byte wave header, the numeric payload (first dimension varying fastest),
//! then optional trailing blocks of which two matter here: the wave note (the
//! instrument parameter dump) and the dimension labels (the channel names of a
//! 3-D scan, one 32-byte entry per layer).
//!
//! 2-D waves yield one 1-D channel per column; 3-D waves yield one 2-D channel
//! per layer, transposed and vertically flipped into image orientation.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dataset::{ArrayData, DatasetAttributes};

use super::{metadata_value, source_identity, Channel, ExtractedFile, FormatError};

const BIN_HEADER_LEN: u64 = 64;
const WAVE_HEADER_LEN: u64 = 320;
const LABEL_ENTRY_LEN: usize = 32;

// Igor numeric type codes (TN003)
const NT_CMPLX: i16 = 0x01;
const NT_FP32: i16 = 0x02;
const NT_FP64: i16 = 0x04;
const NT_I8: i16 = 0x08;
const NT_I16: i16 = 0x10;
const NT_I32: i16 = 0x20;
const NT_UNSIGNED: i16 = 0x40;

struct BinHeader {
    version: i16,
    note_size: i32,
    data_e_units_size: i32,
    dim_e_units_size: [i32; 4],
    dim_labels_size: [i32; 4],
    formula_size: i32,
}

struct WaveHeader {
    npnts: i32,
    type_code: i16,
    n_dim: [i32; 4],
}

/// Parse an `.ibw` file into the uniform ingestion representation
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let bytes = std::fs::read(path).map_err(|e| FormatError::io(path, e))?;
    let (source_name, type_tag) = source_identity(path);
    let mut cursor = Cursor::new(bytes.as_slice());

    let bin = read_bin_header(&mut cursor, path)?;
    if bin.version != 5 {
        return Err(FormatError::parse(
            path,
            format!("unsupported wave version {}", bin.version),
        ));
    }
    let wave = read_wave_header(&mut cursor, path)?;

    validate_type(wave.type_code, path)?;
    let n_points = wave.npnts.max(0) as usize;
    let raw = read_values(&mut cursor, wave.type_code, n_points, path)?;

    // Trailing blocks, in file order: formula, note, extended units, dim labels.
    skip(&mut cursor, bin.formula_size as i64, path)?;
    let mut note_bytes = vec![0u8; bin.note_size.max(0) as usize];
    cursor
        .read_exact(&mut note_bytes)
        .map_err(|e| FormatError::io(path, e))?;
    skip(&mut cursor, bin.data_e_units_size as i64, path)?;
    for size in bin.dim_e_units_size {
        skip(&mut cursor, size as i64, path)?;
    }
    let mut dim_labels: [Vec<String>; 4] = Default::default();
    for (dim, labels) in dim_labels.iter_mut().enumerate() {
        *labels = read_labels(&mut cursor, bin.dim_labels_size[dim], path)?;
    }

    let metadata = parse_note(&note_bytes);

    let dims: Vec<usize> = wave
        .n_dim
        .iter()
        .take_while(|&&d| d > 0)
        .map(|&d| d as usize)
        .collect();
    if dims.is_empty() || dims.iter().product::<usize>() != n_points {
        return Err(FormatError::parse(
            path,
            format!("dimensions {dims:?} do not match {n_points} points"),
        ));
    }

    let channels = match dims.len() {
        2 => split_columns(&raw, dims[0], dims[1], &dim_labels[1], &metadata),
        3 => split_layers(&raw, dims[0], dims[1], dims[2], &dim_labels[2], &metadata),
        n => {
            return Err(FormatError::parse(
                path,
                format!("unsupported wave rank {n}"),
            ))
        }
    }?;

    Ok(ExtractedFile {
        source_name,
        type_tag,
        channels,
        metadata,
    })
}

fn read_bin_header(cursor: &mut Cursor<&[u8]>, path: &Path) -> Result<BinHeader, FormatError> {
    let io = |e| FormatError::io(path, e);
    let version = cursor.read_i16::<LittleEndian>().map_err(io)?;
    let _checksum = cursor.read_i16::<LittleEndian>().map_err(io)?;
    let _wfm_size = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let formula_size = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let note_size = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let data_e_units_size = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let mut dim_e_units_size = [0i32; 4];
    let mut dim_labels_size = [0i32; 4];
    for entry in dim_e_units_size.iter_mut() {
        *entry = cursor.read_i32::<LittleEndian>().map_err(io)?;
    }
    for entry in dim_labels_size.iter_mut() {
        *entry = cursor.read_i32::<LittleEndian>().map_err(io)?;
    }
    let _s_indices_size = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let _options_size_1 = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let _options_size_2 = cursor.read_i32::<LittleEndian>().map_err(io)?;
    debug_assert_eq!(cursor.position(), BIN_HEADER_LEN);

    Ok(BinHeader {
        version,
        note_size,
        data_e_units_size,
        dim_e_units_size,
        dim_labels_size,
        formula_size,
    })
}

fn read_wave_header(cursor: &mut Cursor<&[u8]>, path: &Path) -> Result<WaveHeader, FormatError> {
    let io = |e| FormatError::io(path, e);
    let start = cursor.position();

    // npnts at +12, type at +16, nDim at +68 within the wave header.
    cursor
        .seek(SeekFrom::Start(start + 12))
        .map_err(|e| FormatError::io(path, e))?;
    let npnts = cursor.read_i32::<LittleEndian>().map_err(io)?;
    let type_code = cursor.read_i16::<LittleEndian>().map_err(io)?;

    cursor
        .seek(SeekFrom::Start(start + 68))
        .map_err(|e| FormatError::io(path, e))?;
    let mut n_dim = [0i32; 4];
    for entry in n_dim.iter_mut() {
        *entry = cursor.read_i32::<LittleEndian>().map_err(io)?;
    }

    cursor
        .seek(SeekFrom::Start(start + WAVE_HEADER_LEN))
        .map_err(|e| FormatError::io(path, e))?;

    Ok(WaveHeader {
        npnts,
        type_code,
        n_dim,
    })
}

fn validate_type(type_code: i16, path: &Path) -> Result<(), FormatError> {
    if type_code & NT_CMPLX != 0 {
        return Err(FormatError::parse(path, "complex waves are not supported"));
    }
    match type_code & !NT_UNSIGNED {
        NT_FP32 | NT_FP64 | NT_I8 | NT_I16 | NT_I32 => Ok(()),
        _ => Err(FormatError::parse(
            path,
            format!("unsupported wave type {type_code:#x}"),
        )),
    }
}

fn read_values(
    cursor: &mut Cursor<&[u8]>,
    type_code: i16,
    n_points: usize,
    path: &Path,
) -> Result<Vec<f64>, FormatError> {
    let io = |e| FormatError::io(path, e);
    let unsigned = type_code & NT_UNSIGNED != 0;
    let base = type_code & !NT_UNSIGNED;

    let mut values = Vec::with_capacity(n_points);
    for _ in 0..n_points {
        let value = match (base, unsigned) {
            (NT_FP32, _) => f64::from(cursor.read_f32::<LittleEndian>().map_err(io)?),
            (NT_FP64, _) => cursor.read_f64::<LittleEndian>().map_err(io)?,
            (NT_I8, false) => f64::from(cursor.read_i8().map_err(io)?),
            (NT_I8, true) => f64::from(cursor.read_u8().map_err(io)?),
            (NT_I16, false) => f64::from(cursor.read_i16::<LittleEndian>().map_err(io)?),
            (NT_I16, true) => f64::from(cursor.read_u16::<LittleEndian>().map_err(io)?),
            (NT_I32, false) => f64::from(cursor.read_i32::<LittleEndian>().map_err(io)?),
            (NT_I32, true) => f64::from(cursor.read_u32::<LittleEndian>().map_err(io)?),
            _ => unreachable!("filtered by validate_type"),
        };
        values.push(value);
    }
    Ok(values)
}

fn skip(cursor: &mut Cursor<&[u8]>, len: i64, path: &Path) -> Result<(), FormatError> {
    if len > 0 {
        cursor
            .seek(SeekFrom::Current(len))
            .map_err(|e| FormatError::io(path, e))?;
    }
    Ok(())
}

/// Dimension labels: 32-byte NUL-padded entries, the leading entry names the
/// dimension itself and the rest name its elements. Empty entries are dropped.
fn read_labels(
    cursor: &mut Cursor<&[u8]>,
    size: i32,
    path: &Path,
) -> Result<Vec<String>, FormatError> {
    if size <= 0 {
        return Ok(Vec::new());
    }
    let mut buffer = vec![0u8; size as usize];
    cursor
        .read_exact(&mut buffer)
        .map_err(|e| FormatError::io(path, e))?;

    let mut labels = Vec::new();
    for entry in buffer.chunks(LABEL_ENTRY_LEN) {
        let end = entry.iter().position(|&b| b == 0).unwrap_or(entry.len());
        let label = String::from_utf8_lossy(&entry[..end]).trim().to_string();
        if !label.is_empty() {
            labels.push(normalize_label(label));
        }
    }
    Ok(labels)
}

/// Collapse duplicated direction suffixes (`HeightTraceTrace` → `HeightTrace`)
fn normalize_label(label: String) -> String {
    for suffix in ["Retrace", "Trace"] {
        if let Some(idx) = label.find(suffix) {
            return format!("{}{}", &label[..idx], suffix);
        }
    }
    label
}

/// Wave note: `\r`-separated `key:value` lines
fn parse_note(note: &[u8]) -> BTreeMap<String, serde_json::Value> {
    let text: String = note.iter().map(|&b| b as char).collect();
    let mut metadata = BTreeMap::new();
    for line in text.split('\r') {
        let mut parts = line.splitn(2, ':');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if !key.trim().is_empty() && !value.contains(':') {
                metadata.insert(key.trim().to_string(), metadata_value(value));
            }
        }
    }
    metadata
}

fn note_f64(metadata: &BTreeMap<String, serde_json::Value>, key: &str) -> f64 {
    metadata.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0)
}

fn channel_unit(name: &str) -> Vec<String> {
    let value_unit = if name.contains("Phase") {
        "deg"
    } else if name.contains("Amplitude") {
        "V"
    } else if name.contains("Height") || name.contains("ZSensor") {
        "m"
    } else {
        "unknown"
    };
    vec!["m".to_string(), "m".to_string(), value_unit.to_string()]
}

fn channel_name(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("channel{index}"))
}

fn scan_attributes(
    name: &str,
    shape: &[usize],
    metadata: &BTreeMap<String, serde_json::Value>,
) -> DatasetAttributes {
    let fast = note_f64(metadata, "FastScanSize");
    let slow = note_f64(metadata, "SlowScanSize");
    let mut attributes = DatasetAttributes::new(name, shape)
        .with_size(vec![fast, slow])
        .with_offset(vec![
            note_f64(metadata, "XOffset"),
            note_f64(metadata, "YOffset"),
        ])
        .with_unit(channel_unit(name));
    if let Some(&points) = shape.first() {
        if points > 0 && fast > 0.0 {
            attributes = attributes.with_extra(
                "scale_m_per_px",
                serde_json::json!(fast / points as f64),
            );
        }
    }
    attributes
}

/// 2-D wave: one 1-D channel per column, reversed into image orientation
fn split_columns(
    raw: &[f64],
    rows: usize,
    cols: usize,
    labels: &[String],
    metadata: &BTreeMap<String, serde_json::Value>,
) -> Result<Vec<Channel>, FormatError> {
    let mut channels = Vec::with_capacity(cols);
    for c in 0..cols {
        let name = channel_name(labels, c);
        // First dimension varies fastest on disk.
        let mut values: Vec<f64> = (0..rows).map(|r| raw[r + rows * c]).collect();
        values.reverse();
        let array = ArrayData::from_vec(values);
        let attributes = scan_attributes(&name, array.shape(), metadata);
        channels.push(Channel {
            name,
            array,
            attributes,
        });
    }
    Ok(channels)
}

/// 3-D wave: one 2-D channel per layer, transposed and vertically flipped
fn split_layers(
    raw: &[f64],
    rows: usize,
    cols: usize,
    layers: usize,
    labels: &[String],
    metadata: &BTreeMap<String, serde_json::Value>,
) -> Result<Vec<Channel>, FormatError> {
    let mut channels = Vec::with_capacity(layers);
    for l in 0..layers {
        let name = channel_name(labels, l);
        let mut values = Vec::with_capacity(rows * cols);
        for c in 0..cols {
            for r in 0..rows {
                values.push(raw[r + rows * (c + cols * l)]);
            }
        }
        let array = ArrayData::new(vec![cols, rows], values)?.flip_rows();
        let attributes = scan_attributes(&name, array.shape(), metadata);
        channels.push(Channel {
            name,
            array,
            attributes,
        });
    }
    Ok(channels)
}
