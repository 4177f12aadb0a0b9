//! Nanoscope (Bruker/Veeco) parser
//!
//! Nanoscope scans use numeric extensions (`.000`, `.001`, ...) and consist of
//! an ISO-8859-1 text header followed by a contiguous little-endian `i16`
//! payload. The header is organized in `\*`-prefixed blocks: one
//! `\*Ciao scan list` with run-level parameters and one `\*Ciao image list`
//! per stored channel, terminated by `\*File list end`.
//!
//! Header values carrying SI-prefixed lengths (`5 nm`, `2 ~m`) are normalized
//! to base meters before being stored as metadata.

use std::collections::BTreeMap;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::dataset::{ArrayData, DatasetAttributes};

use super::{metadata_value, source_identity, Channel, ExtractedFile, FormatError};

const FILE_LIST_END: &str = "File list end";
const SCAN_LIST: &str = "\\*Ciao scan list";
const IMAGE_LIST: &str = "\\*Ciao image list";
const IMAGE_DATA_KEY: &str = "@2:Image Data";

/// Parse a Nanoscope file into the uniform ingestion representation
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let bytes = std::fs::read(path).map_err(|e| FormatError::io(path, e))?;
    let (source_name, type_tag) = source_identity(path);

    // The header is pure ISO-8859-1; mapping bytes to code points is lossless.
    let text: String = bytes.iter().map(|&b| b as char).collect();
    let header = text
        .split(FILE_LIST_END)
        .next()
        .ok_or_else(|| FormatError::parse(path, "missing file list end marker"))?;
    if !header.contains(SCAN_LIST) {
        return Err(FormatError::parse(path, "missing Ciao scan list header"));
    }

    let scan_info = parse_scan_info(header);
    let image_infos: Vec<BTreeMap<String, serde_json::Value>> = header
        .split(IMAGE_LIST)
        .skip(1)
        .map(parse_block)
        .collect();
    if image_infos.is_empty() {
        return Err(FormatError::parse(path, "no Ciao image list blocks"));
    }

    let data_offset = image_infos[0]
        .get("Data offset")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| FormatError::parse(path, "missing Data offset"))? as usize;
    if data_offset > bytes.len() {
        return Err(FormatError::parse(path, "Data offset beyond end of file"));
    }

    let payload = &bytes[data_offset..];
    let mut samples = vec![0i16; payload.len() / 2];
    LittleEndian::read_i16_into(&payload[..samples.len() * 2], &mut samples);

    let mut channels = Vec::with_capacity(image_infos.len());
    let mut start = 0usize;
    for info in &image_infos {
        let width = valid_len(info, "Valid data len X", path)?;
        let height = valid_len(info, "Valid data len Y", path).unwrap_or(width);
        let count = width * height;
        if start + count > samples.len() {
            return Err(FormatError::parse(
                path,
                format!("channel data exceeds payload ({count} samples from {start})"),
            ));
        }

        let name = image_data_name(info)
            .ok_or_else(|| FormatError::parse(path, "missing @2:Image Data entry"))?;
        let values: Vec<f64> = samples[start..start + count]
            .iter()
            .map(|&v| f64::from(v))
            .collect();
        let array = ArrayData::new(vec![height, width], values)?;

        let scan_size = scan_info.get("Scan Size").and_then(|v| v.as_f64());
        let mut attributes = DatasetAttributes::new(&name, array.shape());
        if let Some(size) = scan_size {
            attributes = attributes.with_size(vec![size, size]);
            attributes = attributes.with_unit(vec![
                "m".to_string(),
                "m".to_string(),
                "unknown".to_string(),
            ]);
            if width > 0 {
                attributes = attributes
                    .with_extra("scale_m_per_px", serde_json::json!(size / width as f64));
            }
        }
        attributes = attributes.with_offset(vec![
            scan_info.get("X Offset").and_then(|v| v.as_f64()).unwrap_or(0.0),
            scan_info.get("Y Offset").and_then(|v| v.as_f64()).unwrap_or(0.0),
        ]);

        channels.push(Channel {
            name,
            array,
            attributes,
        });
        start += count;
    }

    // Run-level parameters become the source metadata blob.
    Ok(ExtractedFile {
        source_name,
        type_tag,
        channels,
        metadata: scan_info,
    })
}

fn parse_scan_info(header: &str) -> BTreeMap<String, serde_json::Value> {
    header
        .split(SCAN_LIST)
        .nth(1)
        .map(|section| parse_block(section.split("\\*").next().unwrap_or("")))
        .unwrap_or_default()
}

/// Parse `\key: value` lines of one header block
fn parse_block(block: &str) -> BTreeMap<String, serde_json::Value> {
    let mut entries = BTreeMap::new();
    for line in block.split("\r\n") {
        let line = line.trim_start_matches('\\');
        let Some(split) = line.rfind(':') else {
            continue;
        };
        let (key, value) = line.split_at(split);
        if key.is_empty() {
            continue;
        }
        let value = &value[1..];
        entries.insert(key.to_string(), metadata_value(&normalize_units(value)));
    }
    entries
}

/// Normalize `value unit` pairs with SI length prefixes to base meters
fn normalize_units(raw: &str) -> String {
    let mut parts = raw.trim().split_whitespace();
    let (Some(value), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
        return raw.trim().to_string();
    };
    // Divide by the inverse power: 500 nm / 1e9 is exactly 5e-7, where
    // 500 * 1e-9 picks up binary rounding error.
    let divisor = match unit {
        "am" => 1e18,
        "fm" => 1e15,
        "pm" => 1e12,
        "nm" => 1e9,
        "~m" => 1e6,
        "mm" => 1e3,
        "cm" => 1e2,
        "dm" => 1e1,
        "m" => 1.0,
        "km" => 1e-3,
        _ => return raw.trim().to_string(),
    };
    match value.parse::<f64>() {
        Ok(v) => format!("{}", v / divisor),
        Err(_) => raw.trim().to_string(),
    }
}

fn valid_len(
    info: &BTreeMap<String, serde_json::Value>,
    key: &str,
    path: &Path,
) -> Result<usize, FormatError> {
    info.get(key)
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .filter(|&v| v > 0)
        .ok_or_else(|| FormatError::parse(path, format!("missing or invalid {key}")))
}

/// Channel name from `@2:Image Data: S [Height] "Height"`
fn image_data_name(info: &BTreeMap<String, serde_json::Value>) -> Option<String> {
    let raw = info.get(IMAGE_DATA_KEY)?.as_str()?;
    let name = raw.split('"').nth(1)?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}
