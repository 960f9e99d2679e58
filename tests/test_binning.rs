//! Integration tests for temperature binning

use climalink::config::BinningConfig;
use climalink::pipeline::binning::TemperatureBinning;
use rand::{Rng, SeedableRng};

fn binning(width: f64, top_code: Option<f64>) -> TemperatureBinning {
    TemperatureBinning::new(&BinningConfig {
        width,
        reference_upper: 26.0,
        top_code,
    })
}

#[test]
fn test_interior_value_gets_one_degree_bin() {
    let bin = binning(1.0, None).assign(31.4).unwrap();
    assert_eq!(bin.label, "[31,32)");
    assert!(!bin.is_reference);
    assert_eq!(bin.lower, Some(31.0));
    assert_eq!(bin.upper, Some(32.0));
}

#[test]
fn test_reference_bin_labels() {
    let b = binning(1.0, Some(35.0));
    assert_eq!(b.assign(12.0).unwrap().label, "<26°C");
    assert_eq!(b.reference_bin().label, "<26°C");
    assert_eq!(b.assign(26.0).unwrap().label, "[26,27)");
    assert_eq!(b.assign(41.0).unwrap().label, ">=35°C");
}

#[test]
fn test_bins_partition_observed_values() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    for (width, top) in [(1.0, None), (0.5, None), (2.0, Some(36.0))] {
        let b = binning(width, top);
        let values: Vec<f64> = (0..500).map(|_| rng.gen_range(15.0..40.0)).collect();
        let bins = b.bins_for(&values);

        assert!(bins.first().unwrap().is_reference);
        assert_eq!(bins.iter().filter(|bin| bin.is_reference).count(), 1);

        for value in &values {
            let containing: Vec<_> = bins.iter().filter(|bin| bin.contains(*value)).collect();
            assert_eq!(containing.len(), 1, "value {} in {} bins", value, containing.len());
            assert_eq!(containing[0].label, b.assign(*value).unwrap().label);
        }

        // Adjacent bins share an edge
        for pair in bins.windows(2) {
            assert_eq!(pair[0].upper, pair[1].lower);
        }
    }
}

#[test]
fn test_non_finite_values_unassigned() {
    let b = binning(1.0, None);
    assert!(b.assign(f64::NAN).is_none());
    assert!(b.assign(f64::INFINITY).is_none());
    assert!(b.bins_for(&[f64::NAN]).is_empty());
}
