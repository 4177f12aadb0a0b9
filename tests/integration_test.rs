//! Integration tests for spmvault
//!
//! These tests verify the full pipeline: create a container, ingest raw
//! instrument files, run operations, and read everything back.

use spmvault::prelude::*;
use tempfile::tempdir;

mod common;

#[test]
fn test_ingest_then_process_cycle() {
    common::init_logs();
    let dir = tempdir().unwrap();
    let source = dir.path().join("scan01.gsf");
    std::fs::write(&source, common::sample_gsf(8, 6)).unwrap();

    let mut container =
        Container::open(dir.path().join("scan.spmvault"), OpenMode::Create).unwrap();

    // Ingest: one channel, manifest entry, metadata blob.
    let channels = container.extract_data(&source).unwrap();
    assert_eq!(channels, vec![DataPath::new("data/scan01/scan01")]);

    let entry = &container.manifest().sources[0];
    assert_eq!(entry.name, "scan01");
    assert_eq!(entry.type_tag, "gsf");

    let metadata = container.source_metadata("scan01").unwrap();
    assert_eq!(metadata.get("XRes"), Some(&serde_json::json!(8)));

    let raw = container.read(&channels[0]).unwrap();
    assert_eq!(raw.attributes.shape, vec![6, 8]);
    assert_eq!(raw.attributes.size, vec![5e-6, 5e-6]);
    assert_eq!(raw.attributes.offset, vec![1e-6, 0.0]);
    assert_eq!(raw.attributes.unit, vec!["m", "m", "m"]);

    // Process: level the channel, provenance recorded.
    let inputs = vec![ApplyInput::Path(channels[0].clone())];
    let outputs = container
        .apply(
            "plane_level",
            spmvault::processing::plane_level,
            &inputs,
            &["leveled"],
            &ApplyParams::new(),
        )
        .unwrap();
    assert_eq!(outputs, vec![DataPath::new("process/001-plane_level/leveled")]);

    let record = container.provenance(&outputs[0]).unwrap().unwrap();
    assert_eq!(record.operation, "plane_level");
    assert_eq!(
        record.inputs,
        vec![ArgumentRef::Path(DataPath::new("data/scan01/scan01"))]
    );

    container.close().unwrap();

    // Everything survives a read-only reopen.
    let mut reopened =
        Container::open(dir.path().join("scan.spmvault"), OpenMode::ReadOnly).unwrap();
    assert_eq!(reopened.dataset_paths().unwrap().len(), 2);
    let leveled = reopened.read(&outputs[0]).unwrap();
    assert_eq!(leveled.attributes.shape, vec![6, 8]);
    // the gsf fixture is an exact ramp, so leveling flattens it out
    assert!(leveled.array.values().iter().all(|v| v.abs() < 1e-9));
}

#[test]
fn test_ibw_multi_channel_ingest() {
    common::init_logs();
    let dir = tempdir().unwrap();
    let source = dir.path().join("afm.ibw");
    std::fs::write(
        &source,
        common::sample_ibw(6, 6, &["HeightTrace", "PhaseRetrace"]),
    )
    .unwrap();

    let mut container =
        Container::open(dir.path().join("afm.spmvault"), OpenMode::Create).unwrap();
    let channels = container.extract_data(&source).unwrap();
    assert_eq!(
        channels,
        vec![
            DataPath::new("data/afm/HeightTrace"),
            DataPath::new("data/afm/PhaseRetrace"),
        ]
    );

    let height = container.attributes(&channels[0]).unwrap();
    assert_eq!(height.unit, vec!["m", "m", "m"]);
    let phase = container.attributes(&channels[1]).unwrap();
    assert_eq!(phase.unit, vec!["m", "m", "deg"]);
}

#[test]
fn test_multiple_apply_across_sources() {
    let dir = tempdir().unwrap();
    for name in ["a.gsf", "b.gsf"] {
        std::fs::write(dir.path().join(name), common::sample_gsf(4, 4)).unwrap();
    }

    let mut container =
        Container::open(dir.path().join("multi.spmvault"), OpenMode::Create).unwrap();
    container.extract_data(dir.path().join("a.gsf")).unwrap();
    container.extract_data(dir.path().join("b.gsf")).unwrap();

    let inputs: Vec<ApplyInput> = container
        .find_paths("data/*")
        .unwrap()
        .into_iter()
        .map(ApplyInput::Path)
        .collect();
    assert_eq!(inputs.len(), 2);

    let outputs = container
        .multiple_apply(
            "normalize",
            spmvault::processing::normalize,
            &inputs,
            &["a_norm", "b_norm"],
            &ApplyParams::new(),
        )
        .unwrap();

    assert_eq!(
        outputs,
        vec![
            DataPath::new("process/001-normalize/a_norm"),
            DataPath::new("process/001-normalize/b_norm"),
        ]
    );
    for path in &outputs {
        let dataset = container.read(path).unwrap();
        let max = dataset.array.values().iter().cloned().fold(f64::MIN, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
    }
}

#[test]
fn test_failed_ingest_leaves_no_trace() {
    common::init_logs();
    let dir = tempdir().unwrap();
    let source = dir.path().join("broken.gsf");
    let mut bytes = common::sample_gsf(4, 4);
    bytes.truncate(bytes.len() - 10);
    std::fs::write(&source, bytes).unwrap();

    let mut container =
        Container::open(dir.path().join("c.spmvault"), OpenMode::Create).unwrap();
    assert!(container.extract_data(&source).is_err());

    assert!(container.manifest().sources.is_empty());
    assert!(container.dataset_paths().unwrap().is_empty());
    assert!(!dir.path().join("c.spmvault/data/broken").exists());
    assert!(!dir.path().join("c.spmvault/metadata/broken.json").exists());
}

#[test]
fn test_chained_operations_keep_separate_provenance() {
    common::init_logs();
    let dir = tempdir().unwrap();
    let source = dir.path().join("scan.gsf");
    std::fs::write(&source, common::sample_gsf(4, 4)).unwrap();

    let mut container =
        Container::open(dir.path().join("chain.spmvault"), OpenMode::Create).unwrap();
    let channels = container.extract_data(&source).unwrap();

    let leveled = container
        .apply(
            "plane_level",
            spmvault::processing::plane_level,
            &[ApplyInput::Path(channels[0].clone())],
            &[],
            &ApplyParams::new(),
        )
        .unwrap();

    let mut params = ApplyParams::new();
    params.insert("method".to_string(), serde_json::json!("mean"));
    let flattened = container
        .apply(
            "line_flatten",
            spmvault::processing::line_flatten,
            &[ApplyInput::Path(leveled[0].clone())],
            &[],
            &params,
        )
        .unwrap();
    assert_eq!(
        flattened,
        vec![DataPath::new("process/002-line_flatten/line_flatten")]
    );

    // Each output names its own input chain link and parameters.
    let first = container.provenance(&leveled[0]).unwrap().unwrap();
    assert_eq!(first.inputs, vec![ArgumentRef::Path(channels[0].clone())]);
    assert!(first.parameters.is_empty());

    let second = container.provenance(&flattened[0]).unwrap().unwrap();
    assert_eq!(second.inputs, vec![ArgumentRef::Path(leveled[0].clone())]);
    assert_eq!(second.parameters.get("method"), Some(&serde_json::json!("mean")));
}
