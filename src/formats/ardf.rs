//! Asylum Research Data File (`.ARDF`) parser
//!
//! ARDF files are a tree of 16-byte pointer records (CRC, record size, 4-byte
//! type tag, misc) linking tables of contents to payload blocks:
//!
//! ```text
//! ARDF
//! └── FTOC ── IMAG* (image channels), VOLM* (force volumes)
//!     └── TTOC ── TOFF → TEXT (instrument note)
//! IMAG ── TTOC, IDEF (dimensions + title), IBOX → IDAT* (scan lines), GAMI
//! VOLM ── TTOC, VDEF, VCHN* (channel names), XDEF
//! ```
//!
//! Image channels (IMAG) are fully extracted. Force-volume payloads are not
//! decoded; the VOLM channel names are surfaced in the metadata so callers can
//! see what the file holds.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::dataset::{ArrayData, DatasetAttributes};

use super::{metadata_value, source_identity, Channel, ExtractedFile, FormatError};

const POINTER_LEN: u64 = 16;
const TITLE_LEN: usize = 32;

struct Pointer {
    size: u32,
    type_tag: [u8; 4],
}

#[derive(Default)]
struct Toc {
    size_table: u64,
    image_pointers: Vec<u64>,
    volume_pointers: Vec<u64>,
    text_pointers: Vec<u64>,
    data_lines: Vec<Vec<i32>>,
}

/// Parse an `.ARDF` file into the uniform ingestion representation
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let bytes = std::fs::read(path).map_err(|e| FormatError::io(path, e))?;
    let (source_name, type_tag) = source_identity(path);
    let mut cursor = Cursor::new(bytes.as_slice());

    let root = read_pointer(&mut cursor, path)?;
    check_type(&root, b"ARDF", &cursor, path)?;

    // The cursor sits right past the root record, on the FTOC header.
    let ftoc = read_toc(&mut cursor, None, b"FTOC", path)?;
    let ttoc = read_toc(&mut cursor, Some(ftoc.size_table + POINTER_LEN), b"TTOC", path)?;

    let mut metadata = BTreeMap::new();
    if let Some(&loc) = ttoc.text_pointers.first() {
        merge_notes(&mut metadata, &read_text(&mut cursor, loc, path)?);
    }

    let mut channels = Vec::new();
    for &image_loc in &ftoc.image_pointers {
        let (channel, note) = read_image(&mut cursor, image_loc, &metadata, path)?;
        if let Some(note) = note {
            merge_notes(&mut metadata, &note);
        }
        channels.push(channel);
    }

    let mut volume_channels = Vec::new();
    for &volume_loc in &ftoc.volume_pointers {
        volume_channels.extend(read_volume_channels(&mut cursor, volume_loc, path)?);
    }
    if !volume_channels.is_empty() {
        metadata.insert(
            "volume_channels".to_string(),
            serde_json::json!(volume_channels),
        );
    }

    if channels.is_empty() && volume_channels.is_empty() {
        return Err(FormatError::parse(path, "no IMAG or VOLM entries"));
    }

    // Attributes depend on the merged note, so fill them in last.
    for channel in &mut channels {
        channel.attributes = image_attributes(&channel.name, channel.array.shape(), &metadata);
    }

    Ok(ExtractedFile {
        source_name,
        type_tag,
        channels,
        metadata,
    })
}

fn read_pointer(cursor: &mut Cursor<&[u8]>, path: &Path) -> Result<Pointer, FormatError> {
    let io = |e| FormatError::io(path, e);
    let _crc = cursor.read_u32::<LittleEndian>().map_err(io)?;
    let size = cursor.read_u32::<LittleEndian>().map_err(io)?;
    let mut type_tag = [0u8; 4];
    cursor.read_exact(&mut type_tag).map_err(io)?;
    let _misc = cursor.read_u32::<LittleEndian>().map_err(io)?;
    Ok(Pointer { size, type_tag })
}

fn check_type(
    pointer: &Pointer,
    expected: &[u8; 4],
    cursor: &Cursor<&[u8]>,
    path: &Path,
) -> Result<(), FormatError> {
    if &pointer.type_tag != expected {
        return Err(FormatError::parse(
            path,
            format!(
                "expected '{}' record, found '{}' at offset {}",
                String::from_utf8_lossy(expected),
                String::from_utf8_lossy(&pointer.type_tag),
                cursor.position().saturating_sub(POINTER_LEN),
            ),
        ));
    }
    Ok(())
}

/// Read a table of contents at `address` (or the current position)
fn read_toc(
    cursor: &mut Cursor<&[u8]>,
    address: Option<u64>,
    expected: &[u8; 4],
    path: &Path,
) -> Result<Toc, FormatError> {
    let io = |e| FormatError::io(path, e);
    if let Some(address) = address {
        cursor.seek(SeekFrom::Start(address)).map_err(io)?;
    }

    let header = read_pointer(cursor, path)?;
    let mut toc = Toc::default();
    if header.size == 0 {
        return Ok(toc);
    }
    check_type(&header, expected, cursor, path)?;

    toc.size_table = cursor.read_u64::<LittleEndian>().map_err(io)?;
    let entry_count = cursor.read_u32::<LittleEndian>().map_err(io)?;
    let entry_size = cursor.read_u32::<LittleEndian>().map_err(io)?;

    for _ in 0..entry_count {
        let entry = read_pointer(cursor, path)?;
        if entry.size == 0 {
            continue;
        }
        match &entry.type_tag {
            b"IMAG" => toc.image_pointers.push(cursor.read_u64::<LittleEndian>().map_err(io)?),
            b"VOLM" => toc.volume_pointers.push(cursor.read_u64::<LittleEndian>().map_err(io)?),
            b"NEXT" | b"NSET" | b"THMB" => {
                let _pointer = cursor.read_u64::<LittleEndian>().map_err(io)?;
            }
            b"TOFF" => {
                let _index = cursor.read_u64::<LittleEndian>().map_err(io)?;
                toc.text_pointers.push(cursor.read_u64::<LittleEndian>().map_err(io)?);
            }
            b"IDAT" => {
                let values = (entry_size.saturating_sub(16) / 4) as usize;
                let mut line = Vec::with_capacity(values);
                for _ in 0..values {
                    line.push(cursor.read_i32::<LittleEndian>().map_err(io)?);
                }
                toc.data_lines.push(line);
            }
            _ => {
                // Not a table entry; rewind so the caller can read it.
                cursor
                    .seek(SeekFrom::Current(-(POINTER_LEN as i64)))
                    .map_err(io)?;
                break;
            }
        }
    }

    Ok(toc)
}

/// Read a TEXT record: pointer header, misc word, note length, note bytes
fn read_text(cursor: &mut Cursor<&[u8]>, address: u64, path: &Path) -> Result<String, FormatError> {
    let io = |e| FormatError::io(path, e);
    cursor.seek(SeekFrom::Start(address)).map_err(io)?;
    let pointer = read_pointer(cursor, path)?;
    check_type(&pointer, b"TEXT", cursor, path)?;

    let _misc = cursor.read_u32::<LittleEndian>().map_err(io)?;
    let len = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
    let mut buffer = vec![0u8; len];
    cursor.read_exact(&mut buffer).map_err(io)?;
    Ok(buffer.iter().map(|&b| b as char).filter(|&c| c != '\0').collect())
}

/// Read an IDEF/VDEF definition record: dimensions plus a 32-byte title
fn read_def(
    cursor: &mut Cursor<&[u8]>,
    address: u64,
    expected: &[u8; 4],
    path: &Path,
) -> Result<(usize, usize, String), FormatError> {
    let io = |e| FormatError::io(path, e);
    cursor.seek(SeekFrom::Start(address)).map_err(io)?;
    let pointer = read_pointer(cursor, path)?;
    check_type(&pointer, expected, cursor, path)?;

    let points = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;
    let lines = cursor.read_u32::<LittleEndian>().map_err(io)? as usize;

    let inner_skip: i64 = if expected == b"IDEF" { 96 } else { 144 };
    cursor.seek(SeekFrom::Current(inner_skip)).map_err(io)?;

    let mut title = [0u8; TITLE_LEN];
    cursor.read_exact(&mut title).map_err(io)?;
    let title: String = title
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();

    let consumed = POINTER_LEN as i64 + 8 + inner_skip + TITLE_LEN as i64;
    let remaining = i64::from(pointer.size) - consumed;
    if remaining > 0 {
        cursor.seek(SeekFrom::Current(remaining)).map_err(io)?;
    }

    Ok((points, lines, title))
}

/// Read one IMAG subtree: definition, scan-line data, and its note if present
fn read_image(
    cursor: &mut Cursor<&[u8]>,
    address: u64,
    _metadata: &BTreeMap<String, serde_json::Value>,
    path: &Path,
) -> Result<(Channel, Option<String>), FormatError> {
    let imag = read_toc(cursor, Some(address), b"IMAG", path)?;
    let ttoc = read_toc(cursor, Some(address + imag.size_table), b"TTOC", path)?;
    let (points, lines, title) = read_def(
        cursor,
        address + imag.size_table + ttoc.size_table,
        b"IDEF",
        path,
    )?;

    let ibox = read_toc(cursor, None, b"IBOX", path)?;
    let footer = read_pointer(cursor, path)?;
    check_type(&footer, b"GAMI", cursor, path)?;

    if ibox.data_lines.len() != lines {
        return Err(FormatError::parse(
            path,
            format!(
                "image '{title}' holds {} lines, header says {lines}",
                ibox.data_lines.len()
            ),
        ));
    }
    let rows: Vec<Vec<f64>> = ibox
        .data_lines
        .iter()
        .map(|line| line.iter().take(points).map(|&v| f64::from(v)).collect())
        .collect();
    let array = ArrayData::from_rows(rows)?;

    let mut note = None;
    for &text_loc in &ttoc.text_pointers {
        let text = read_text(cursor, text_loc, path)?;
        if !text.is_empty() {
            note = Some(text);
        }
    }

    let attributes = DatasetAttributes::new(&title, array.shape());
    Ok((
        Channel {
            name: title,
            array,
            attributes,
        },
        note,
    ))
}

/// Walk a VOLM subtree far enough to list its channel names
fn read_volume_channels(
    cursor: &mut Cursor<&[u8]>,
    address: u64,
    path: &Path,
) -> Result<Vec<String>, FormatError> {
    let io = |e| FormatError::io(path, e);
    let volm = read_toc(cursor, Some(address), b"VOLM", path)?;
    let ttoc = read_toc(cursor, Some(address + volm.size_table), b"TTOC", path)?;
    let _def = read_def(
        cursor,
        address + volm.size_table + ttoc.size_table,
        b"VDEF",
        path,
    )?;

    let mut names = Vec::new();
    loop {
        let pointer = read_pointer(cursor, path)?;
        match &pointer.type_tag {
            b"VCHN" => {
                let mut name = [0u8; TITLE_LEN];
                cursor.read_exact(&mut name).map_err(io)?;
                let name: String = name
                    .iter()
                    .take_while(|&&b| b != 0)
                    .map(|&b| b as char)
                    .collect();
                if !name.is_empty() {
                    names.push(name);
                }
                let remaining = i64::from(pointer.size) - POINTER_LEN as i64 - TITLE_LEN as i64;
                if remaining > 0 {
                    cursor.seek(SeekFrom::Current(remaining)).map_err(io)?;
                }
            }
            b"XDEF" => break,
            other => {
                return Err(FormatError::parse(
                    path,
                    format!(
                        "unexpected '{}' record in volume channel table",
                        String::from_utf8_lossy(other)
                    ),
                ));
            }
        }
    }
    Ok(names)
}

/// Merge `\r`-separated `key:value` note lines, keeping earlier entries
fn merge_notes(metadata: &mut BTreeMap<String, serde_json::Value>, note: &str) {
    for line in note.split('\r') {
        let mut parts = line.splitn(2, ':');
        if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
            if !key.trim().is_empty() && !value.contains(':') {
                metadata
                    .entry(key.trim().to_string())
                    .or_insert_with(|| metadata_value(value));
            }
        }
    }
}

fn image_attributes(
    name: &str,
    shape: &[usize],
    metadata: &BTreeMap<String, serde_json::Value>,
) -> DatasetAttributes {
    let note_f64 = |key: &str| metadata.get(key).and_then(|v| v.as_f64());
    let fast = note_f64("FastScanSize").or_else(|| note_f64("ScanSize")).unwrap_or(0.0);
    let slow = note_f64("SlowScanSize").or_else(|| note_f64("ScanSize")).unwrap_or(0.0);
    DatasetAttributes::new(name, shape)
        .with_size(vec![fast, slow])
        .with_offset(vec![
            note_f64("XOffset").unwrap_or(0.0),
            note_f64("YOffset").unwrap_or(0.0),
        ])
        .with_unit(vec![
            "m".to_string(),
            "m".to_string(),
            "unknown".to_string(),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn pointer(type_tag: &[u8; 4], size: u32) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        bytes.write_all(&0u32.to_le_bytes()).unwrap(); // crc
        bytes.write_all(&size.to_le_bytes()).unwrap();
        bytes.write_all(type_tag).unwrap();
        bytes.write_all(&0u32.to_le_bytes()).unwrap(); // misc
        bytes
    }

    fn toc_header(type_tag: &[u8; 4], size_table: u64, entries: u32, entry_size: u32) -> Vec<u8> {
        let mut bytes = pointer(type_tag, 32);
        bytes.write_all(&size_table.to_le_bytes()).unwrap();
        bytes.write_all(&entries.to_le_bytes()).unwrap();
        bytes.write_all(&entry_size.to_le_bytes()).unwrap();
        bytes
    }

    fn text_record(note: &str) -> Vec<u8> {
        let mut bytes = pointer(b"TEXT", 24 + note.len() as u32);
        bytes.write_all(&0u32.to_le_bytes()).unwrap();
        bytes.write_all(&(note.len() as u32).to_le_bytes()).unwrap();
        bytes.write_all(note.as_bytes()).unwrap();
        bytes
    }

    /// Build a synthetic ARDF with one image channel and a main note
    pub(crate) fn sample_ardf(points: usize, lines: usize, title: &str) -> Vec<u8> {
        let mut bytes = pointer(b"ARDF", 16);

        // FTOC: one IMAG entry. Table runs from offset 16; TTOC follows at
        // size_table + 16.
        let ftoc_table = 32 + 24; // header fields + one 24-byte entry
        let ttoc_at = 16 + ftoc_table as u64;
        let text_at = ttoc_at + 32 + 32; // TTOC header + one TOFF entry
        let note = "FastScanSize:5e-06\rSlowScanSize:5e-06\rXOffset:0\rYOffset:0\rScanMode:AC Mode\r";
        let imag_at = text_at + 24 + note.len() as u64;

        bytes.extend(toc_header(b"FTOC", ftoc_table as u64, 1, 24));
        bytes.extend(pointer(b"IMAG", 24));
        bytes.write_all(&imag_at.to_le_bytes()).unwrap();

        bytes.extend(toc_header(b"TTOC", 64, 1, 32));
        bytes.extend(pointer(b"TOFF", 32));
        bytes.write_all(&0u64.to_le_bytes()).unwrap();
        bytes.write_all(&text_at.to_le_bytes()).unwrap();

        bytes.extend(text_record(note));

        // IMAG subtree: empty IMAG TOC, empty TTOC, IDEF, IBOX lines, GAMI.
        assert_eq!(bytes.len() as u64, imag_at);
        bytes.extend(toc_header(b"IMAG", 32, 0, 24));
        bytes.extend(toc_header(b"TTOC", 32, 0, 32));

        let idef_size = 16 + 8 + 96 + 32;
        bytes.extend(pointer(b"IDEF", idef_size as u32));
        bytes.write_all(&(points as u32).to_le_bytes()).unwrap();
        bytes.write_all(&(lines as u32).to_le_bytes()).unwrap();
        bytes.extend(std::iter::repeat(0u8).take(96));
        let mut title_block = [0u8; 32];
        title_block[..title.len()].copy_from_slice(title.as_bytes());
        bytes.write_all(&title_block).unwrap();

        let entry_size = 16 + 4 * points as u32;
        bytes.extend(toc_header(b"IBOX", 0, lines as u32, entry_size));
        for line in 0..lines {
            bytes.extend(pointer(b"IDAT", entry_size));
            for p in 0..points {
                bytes
                    .write_all(&((line * points + p) as i32).to_le_bytes())
                    .unwrap();
            }
        }
        bytes.extend(pointer(b"GAMI", 16));
        bytes
    }

    #[test]
    fn test_extract_image_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.ARDF");
        std::fs::write(&path, sample_ardf(4, 3, "Height")).unwrap();

        let extracted = extract(&path).unwrap();
        assert_eq!(extracted.channels.len(), 1);

        let channel = &extracted.channels[0];
        assert_eq!(channel.name, "Height");
        assert_eq!(channel.array.shape(), &[3, 4]);
        assert_eq!(channel.array.get(&[1, 2]), Some(6.0));
        assert_eq!(channel.attributes.size, vec![5e-6, 5e-6]);
        assert_eq!(
            extracted.metadata.get("ScanMode"),
            Some(&serde_json::json!("AC Mode"))
        );
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ARDF");
        std::fs::write(&path, pointer(b"NOPE", 16)).unwrap();

        let err = extract(&path).unwrap_err();
        assert!(matches!(err, FormatError::ParseError { .. }));
    }

    #[test]
    fn test_line_count_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.ARDF");
        let mut bytes = sample_ardf(4, 3, "Height");
        // Drop the GAMI footer and the last IDAT line.
        let line_len = 16 + 16; // pointer + 4 values
        bytes.truncate(bytes.len() - 16 - line_len);
        bytes.extend(pointer(b"GAMI", 16));
        std::fs::write(&path, bytes).unwrap();

        let err = extract(&path).unwrap_err();
        assert!(matches!(err, FormatError::ParseError { .. }));
    }
}
