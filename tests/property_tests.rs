//! Property-based tests: storage round-trips must be exact for any finite
//! input, and the processing operations must hold their numeric invariants.

use proptest::prelude::*;
use spmvault::prelude::*;

fn finite_values(max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(any::<f64>().prop_filter("finite", |v| v.is_finite()), 1..max)
}

proptest! {
    /// Any finite array survives the Parquet round trip bit-exactly
    #[test]
    fn test_store_round_trip(values in finite_values(200), name in "[A-Za-z][A-Za-z0-9]{0,16}") {
        let array = ArrayData::new(vec![values.len()], values).unwrap();
        let attributes = DatasetAttributes::new(&name, array.shape());
        let dataset = Dataset::new(array, attributes);

        let mut buffer = Vec::new();
        spmvault::store::write_dataset(&mut buffer, &dataset, None).unwrap();
        let stored = spmvault::store::read_dataset_from(bytes::Bytes::from(buffer)).unwrap();

        prop_assert_eq!(stored.dataset, dataset);
    }

    /// 2-D shapes reconstruct exactly from the flattened column
    #[test]
    fn test_2d_shape_round_trip(rows in 1usize..12, cols in 1usize..12) {
        let values: Vec<f64> = (0..rows * cols).map(|i| i as f64).collect();
        let array = ArrayData::new(vec![rows, cols], values).unwrap();
        let dataset = Dataset::new(array, DatasetAttributes::new("grid", &[rows, cols]));

        let mut buffer = Vec::new();
        spmvault::store::write_dataset(&mut buffer, &dataset, None).unwrap();
        let stored = spmvault::store::read_dataset_from(bytes::Bytes::from(buffer)).unwrap();

        prop_assert_eq!(stored.dataset.array.shape(), &[rows, cols]);
        for row in 0..rows {
            for col in 0..cols {
                prop_assert_eq!(
                    stored.dataset.array.get(&[row, col]),
                    Some((row * cols + col) as f64)
                );
            }
        }
    }

    /// Attribute sets survive the JSON footer encoding
    #[test]
    fn test_attributes_json_round_trip(
        name in "[A-Za-z][A-Za-z0-9 ]{0,20}",
        size in prop::collection::vec(1e-9f64..1e-3, 2),
        offset in prop::collection::vec(-1e-3f64..1e-3, 2),
    ) {
        let attributes = DatasetAttributes::new(&name, &[4, 4])
            .with_size(size)
            .with_offset(offset)
            .with_unit(vec!["m".into(), "m".into(), "deg".into()]);

        let json = attributes.to_json().unwrap();
        let decoded = DatasetAttributes::from_json(&json).unwrap();
        prop_assert_eq!(decoded, attributes);
    }

    /// Normalize always lands in [0, 1]
    #[test]
    fn test_normalize_bounds(values in finite_values(100)) {
        let array = ArrayData::new(vec![values.len()], values).unwrap();
        let attributes = DatasetAttributes::new("n", array.shape());
        let input = vec![ResolvedInput::Array(Dataset::new(array, attributes))];

        let out = spmvault::processing::normalize(&input, &ApplyParams::new()).unwrap();
        for v in out[0].values() {
            prop_assert!((0.0..=1.0).contains(v), "{v}");
        }
    }

    /// Provenance records survive their JSON encoding for any parameter set
    #[test]
    fn test_provenance_json_round_trip(
        operation in "[a-z_]{1,20}",
        literal in ".{0,30}",
        factor in any::<f64>().prop_filter("finite", |v| v.is_finite()),
    ) {
        let mut parameters = std::collections::BTreeMap::new();
        parameters.insert("factor".to_string(), serde_json::json!(factor));

        let record = ProvenanceRecord {
            operation: operation.clone(),
            operation_number: "007".to_string(),
            output_name: operation,
            timestamp: "2026-08-30T00:00:00+00:00".to_string(),
            inputs: vec![
                ArgumentRef::Path(DataPath::new("data/scan/Height")),
                ArgumentRef::Literal(literal),
            ],
            parameters,
        };

        let json = record.to_json().unwrap();
        let decoded = ProvenanceRecord::from_json(&json).unwrap();
        prop_assert_eq!(decoded, record);
    }
}
