//! Shared fixtures for the integration suites: synthetic raw files small
//! enough to build inline but exercising the real binary layouts.
//!
//! Not every suite uses every fixture.
#![allow(dead_code)]

use std::io::Write;

/// Route library logs through the test harness
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Minimal Gwyddion Simple Field file, values 0..x_res*y_res
pub fn sample_gsf(x_res: usize, y_res: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    write!(
        bytes,
        "Gwyddion Simple Field 1.0\nXRes = {x_res}\nYRes = {y_res}\nXReal = 5e-06\nYReal = 5e-06\nXOffset = 1e-06\nYOffset = 0\nXYUnits = m\nZUnits = m\n"
    )
    .unwrap();
    let pad = 4 - bytes.len() % 4;
    bytes.extend(std::iter::repeat(0u8).take(pad));
    for i in 0..(x_res * y_res) {
        bytes.extend_from_slice(&(i as f32).to_le_bytes());
    }
    bytes
}

/// Synthetic version-5 Igor Binary Wave holding a 3-D wave, one layer per
/// channel name, values 0..rows*cols*layers as f32
pub fn sample_ibw(rows: usize, cols: usize, channel_names: &[&str]) -> Vec<u8> {
    const LABEL_ENTRY_LEN: usize = 32;
    const NT_FP32: i16 = 2;

    let layers = channel_names.len();
    let note =
        b"FastScanSize:5e-06\rSlowScanSize:5e-06\rXOffset:1e-06\rYOffset:0\rScanRate:1\r".to_vec();

    let mut labels = vec![0u8; LABEL_ENTRY_LEN * (layers + 1)];
    for (i, name) in channel_names.iter().enumerate() {
        let start = LABEL_ENTRY_LEN * (i + 1);
        labels[start..start + name.len()].copy_from_slice(name.as_bytes());
    }

    let npnts = rows * cols * layers;

    let mut bin = Vec::new();
    bin.write_all(&5i16.to_le_bytes()).unwrap(); // version
    bin.write_all(&0i16.to_le_bytes()).unwrap(); // checksum
    bin.write_all(&0i32.to_le_bytes()).unwrap(); // wfmSize
    bin.write_all(&0i32.to_le_bytes()).unwrap(); // formulaSize
    bin.write_all(&(note.len() as i32).to_le_bytes()).unwrap();
    bin.write_all(&0i32.to_le_bytes()).unwrap(); // dataEUnitsSize
    for _ in 0..4 {
        bin.write_all(&0i32.to_le_bytes()).unwrap(); // dimEUnitsSize
    }
    for dim in 0..4 {
        let size = if dim == 2 { labels.len() as i32 } else { 0 };
        bin.write_all(&size.to_le_bytes()).unwrap();
    }
    for _ in 0..3 {
        bin.write_all(&0i32.to_le_bytes()).unwrap(); // sIndices/options
    }

    let mut wave = vec![0u8; 320];
    wave[12..16].copy_from_slice(&(npnts as i32).to_le_bytes());
    wave[16..18].copy_from_slice(&NT_FP32.to_le_bytes());
    wave[68..72].copy_from_slice(&(rows as i32).to_le_bytes());
    wave[72..76].copy_from_slice(&(cols as i32).to_le_bytes());
    wave[76..80].copy_from_slice(&(layers as i32).to_le_bytes());

    let mut bytes = bin;
    bytes.extend_from_slice(&wave);
    for i in 0..npnts {
        bytes.extend_from_slice(&(i as f32).to_le_bytes());
    }
    bytes.extend_from_slice(&note);
    bytes.extend_from_slice(&labels);
    bytes
}
