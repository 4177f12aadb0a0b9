//! PANalytical XRDML diffraction scan parser (`.xrdml`)
//!
//! An XRDML file holds one or more `<dataPoints>` scans. Each scan carries a
//! whitespace-separated counts list plus per-axis positions given either as a
//! single common position or as a start/end pair swept linearly over the
//! counts. Channels come out with shape `(steps, scans)`; element `(i, j)` is
//! step `i` of scan `j`.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::dataset::{ArrayData, DatasetAttributes};

use super::{source_identity, Channel, ExtractedFile, FormatError};

/// Axis attribute values paired with the channel name they populate
const AXES: [(&str, &str); 6] = [
    ("2Theta", "2theta"),
    ("Omega", "omega"),
    ("Phi", "phi"),
    ("Chi", "chi"),
    ("X", "x"),
    ("Z", "y"),
];

#[derive(Debug, Clone, Copy)]
enum AxisRange {
    Common(f64),
    Sweep { start: f64, end: f64 },
}

impl AxisRange {
    /// Position at step `index` of `steps`
    fn at(&self, index: usize, steps: usize) -> f64 {
        match *self {
            AxisRange::Common(value) => value,
            AxisRange::Sweep { start, end } => {
                start + index as f64 * (end - start) / steps as f64
            }
        }
    }
}

#[derive(Debug, Default)]
struct ScanBlock {
    counts: Vec<f64>,
    axes: BTreeMap<String, AxisRange>,
}

/// Parse an `.xrdml` file into counts and axis-position channels
pub fn extract(path: &Path) -> Result<ExtractedFile, FormatError> {
    let contents = std::fs::read_to_string(path).map_err(|e| FormatError::io(path, e))?;
    let scans = parse_scans(&contents, path)?;
    if scans.is_empty() {
        return Err(FormatError::parse(path, "no <dataPoints> scans"));
    }

    let steps = scans[0].counts.len();
    for (i, scan) in scans.iter().enumerate() {
        if scan.counts.len() != steps {
            return Err(FormatError::parse(
                path,
                format!("scan {i} holds {} counts, scan 0 holds {steps}", scan.counts.len()),
            ));
        }
    }

    let (source_name, type_tag) = source_identity(path);
    let mut channels = Vec::new();

    // counts first, then every axis that all scans report
    let counts = column_major(&scans, |scan, step| scan.counts[step]);
    channels.push(make_channel("counts", "au", counts, steps, scans.len())?);

    for (axis, name) in AXES {
        if !scans.iter().all(|scan| scan.axes.contains_key(axis)) {
            continue;
        }
        let values = column_major(&scans, |scan, step| scan.axes[axis].at(step, steps));
        let unit = if matches!(name, "x" | "y") { "mm" } else { "deg" };
        channels.push(make_channel(name, unit, values, steps, scans.len())?);
    }

    let mut metadata = BTreeMap::new();
    metadata.insert("raw_xml".to_string(), serde_json::json!(contents));
    metadata.insert("scans".to_string(), serde_json::json!(scans.len()));

    Ok(ExtractedFile {
        source_name,
        type_tag,
        channels,
        metadata,
    })
}

/// Flatten per-scan values into row-major `(steps, scans)` order
fn column_major(scans: &[ScanBlock], value: impl Fn(&ScanBlock, usize) -> f64) -> Vec<f64> {
    let steps = scans[0].counts.len();
    let mut values = Vec::with_capacity(steps * scans.len());
    for step in 0..steps {
        for scan in scans {
            values.push(value(scan, step));
        }
    }
    values
}

fn make_channel(
    name: &str,
    unit: &str,
    values: Vec<f64>,
    steps: usize,
    scans: usize,
) -> Result<Channel, FormatError> {
    let array = ArrayData::new(vec![steps, scans], values)?;
    let attributes =
        DatasetAttributes::new(name, array.shape()).with_unit(vec![unit.to_string()]);
    Ok(Channel {
        name: name.to_string(),
        array,
        attributes,
    })
}

fn parse_scans(contents: &str, path: &Path) -> Result<Vec<ScanBlock>, FormatError> {
    let xml = |e: quick_xml::Error| FormatError::parse(path, e.to_string());

    let mut reader = Reader::from_str(contents);
    reader.config_mut().trim_text(true);

    let mut scans = Vec::new();
    let mut scan: Option<ScanBlock> = None;
    let mut axis: Option<String> = None;
    let mut range: Option<AxisRange> = None;
    // element whose text is pending: counts, startPosition, endPosition, commonPosition
    let mut pending: Option<&'static str> = None;

    loop {
        match reader.read_event().map_err(xml)? {
            Event::Start(e) => match e.name().as_ref() {
                b"dataPoints" => scan = Some(ScanBlock::default()),
                b"positions" if scan.is_some() => {
                    axis = e
                        .try_get_attribute("axis")
                        .map_err(|e| FormatError::parse(path, e.to_string()))?
                        .and_then(|a| std::str::from_utf8(&a.value).ok().map(str::to_string));
                    range = None;
                }
                b"counts" | b"intensities" if scan.is_some() => pending = Some("counts"),
                b"startPosition" => pending = Some("start"),
                b"endPosition" => pending = Some("end"),
                b"commonPosition" => pending = Some("common"),
                _ => {}
            },
            Event::Text(t) => {
                let Some(kind) = pending.take() else { continue };
                let text = t.unescape().map_err(xml)?;
                let Some(scan) = scan.as_mut() else { continue };
                match kind {
                    "counts" => {
                        for token in text.split_whitespace() {
                            let count: f64 = token.parse().map_err(|_| {
                                FormatError::parse(path, format!("non-numeric count '{token}'"))
                            })?;
                            scan.counts.push(count);
                        }
                    }
                    _ => {
                        let value: f64 = text.trim().parse().map_err(|_| {
                            FormatError::parse(path, format!("non-numeric position '{text}'"))
                        })?;
                        range = Some(match (kind, range) {
                            ("start", _) => AxisRange::Sweep { start: value, end: value },
                            ("end", Some(AxisRange::Sweep { start, .. })) => {
                                AxisRange::Sweep { start, end: value }
                            }
                            _ => AxisRange::Common(value),
                        });
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"positions" => {
                    if let (Some(axis), Some(range), Some(scan)) =
                        (axis.take(), range.take(), scan.as_mut())
                    {
                        scan.axes.insert(axis, range);
                    }
                }
                b"dataPoints" => {
                    if let Some(scan) = scan.take() {
                        scans.push(scan);
                    }
                }
                _ => pending = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(scans)
}
