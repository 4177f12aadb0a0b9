//! Gwyddion Simple Field 1.0 parser
//!
//! Layout: a magic line, a `key = value` text header terminated by NUL bytes
//! padding the data start to a 4-byte boundary, then `XRes * YRes` little-endian
//! `f32` values.
//!
//! Reference: <http://gwyddion.net/documentation/user-guide-en/gsf.html>

use std::collections::BTreeMap;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::dataset::{ArrayData, DatasetAttributes};

use super::{metadata_value, source_identity, Channel, ExtractedFile, FormatError};

const MAGIC: &str = "Gwyddion Simple Field 1.0";

/// Parse a `.gsf` file into the uniform ingestion representation
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let bytes = std::fs::read(path).map_err(|e| FormatError::io(path, e))?;
    let (name, type_tag) = source_identity(path);

    let mut pos = read_line(&bytes, 0)
        .filter(|(line, _)| line.trim_end() == MAGIC)
        .map(|(_, next)| next)
        .ok_or_else(|| FormatError::parse(path, "file has wrong header"))?;

    // Header lines run until the NUL padding begins.
    let mut metadata = BTreeMap::new();
    while pos < bytes.len() && bytes[pos] != 0 {
        let (line, next) = read_line(&bytes, pos)
            .ok_or_else(|| FormatError::parse(path, "unterminated header"))?;
        if let Some((key, value)) = line.split_once('=') {
            metadata.insert(key.trim().to_string(), metadata_value(value));
        }
        pos = next;
    }

    // NUL padding to the next 4-byte boundary; the format mandates one to four bytes.
    pos += 4 - pos % 4;
    if pos > bytes.len() {
        return Err(FormatError::parse(path, "truncated after header padding"));
    }

    let x_res = required_dim(&metadata, "XRes", path)?;
    let y_res = required_dim(&metadata, "YRes", path)?;

    let payload = &bytes[pos..];
    if payload.len() < x_res * y_res * 4 {
        return Err(FormatError::parse(
            path,
            format!(
                "data payload holds {} bytes, need {} for {}x{}",
                payload.len(),
                x_res * y_res * 4,
                x_res,
                y_res
            ),
        ));
    }

    let mut values = vec![0.0f32; x_res * y_res];
    LittleEndian::read_f32_into(&payload[..x_res * y_res * 4], &mut values);
    let array = ArrayData::new(vec![y_res, x_res], values.into_iter().map(f64::from).collect())?;

    let size = vec![
        physical(&metadata, "XReal").unwrap_or(x_res as f64),
        physical(&metadata, "YReal").unwrap_or(y_res as f64),
    ];
    let offset = vec![
        physical(&metadata, "XOffset").unwrap_or(0.0),
        physical(&metadata, "YOffset").unwrap_or(0.0),
    ];
    let lateral_unit = metadata
        .get("XYUnits")
        .and_then(|v| v.as_str())
        .unwrap_or("m")
        .to_string();
    let value_unit = metadata
        .get("ZUnits")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let attributes = DatasetAttributes::new(&name, array.shape())
        .with_size(size)
        .with_offset(offset)
        .with_unit(vec![lateral_unit.clone(), lateral_unit, value_unit]);

    Ok(ExtractedFile {
        source_name: name.clone(),
        type_tag,
        channels: vec![Channel {
            name,
            array,
            attributes,
        }],
        metadata,
    })
}

/// Next `\n`-terminated UTF-8 line starting at `pos` and the following offset
fn read_line(bytes: &[u8], pos: usize) -> Option<(String, usize)> {
    let rest = bytes.get(pos..)?;
    let end = rest.iter().position(|&b| b == b'\n')?;
    let line = std::str::from_utf8(&rest[..end]).ok()?;
    Some((line.to_string(), pos + end + 1))
}

fn required_dim(
    metadata: &BTreeMap<String, serde_json::Value>,
    key: &str,
    path: &Path,
) -> Result<usize, FormatError> {
    metadata
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .filter(|&v| v > 0)
        .ok_or_else(|| FormatError::parse(path, format!("missing or invalid {key}")))
}

fn physical(metadata: &BTreeMap<String, serde_json::Value>, key: &str) -> Option<f64> {
    metadata.get(key).and_then(|v| v.as_f64())
}

/// Build a minimal well-formed gsf file
#[cfg(test)]
pub(crate) fn sample_gsf(x_res: usize, y_res: usize) -> Vec<u8> {
    use std::io::Write;

    let mut bytes = Vec::new();
    write!(
        bytes,
        "{MAGIC}\nXRes = {x_res}\nYRes = {y_res}\nXReal = 5e-06\nYReal = 5e-06\nXOffset = 1e-06\nYOffset = 0\nXYUnits = m\nZUnits = m\n"
    )
    .unwrap();
    let pad = 4 - bytes.len() % 4;
    bytes.extend(std::iter::repeat(0u8).take(pad));
    for i in 0..(x_res * y_res) {
        bytes.extend_from_slice(&(i as f32).to_le_bytes());
    }
    bytes
}
