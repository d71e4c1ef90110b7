//! Year selection for capability levels.

use std::borrow::Borrow;
use std::collections::BTreeSet;

use crate::dataset::CapabilitySample;

/// Level assumed for a capability with no recorded history.
pub const DEFAULT_LEVEL: f64 = 0.3;

pub const DEFAULT_YEARS: [i32; 7] = [2019, 2020, 2021, 2022, 2023, 2024, 2025];

/// Level to use for `sample` in `year`.
///
/// An exact record wins. Otherwise the mean of every recorded level is used,
/// and a sample with no records at all resolves to [`DEFAULT_LEVEL`].
pub fn resolve_level(sample: &CapabilitySample, year: i32) -> f64 {
    if let Some(&level) = sample.heights.get(&year) {
        return level;
    }
    if sample.heights.is_empty() {
        return DEFAULT_LEVEL;
    }
    // BTreeMap iteration is year-ordered, so the sum is bit-stable.
    let total: f64 = sample.heights.values().sum();
    total / sample.heights.len() as f64
}

/// Every year recorded by at least one sample, ascending.
pub fn recorded_years<S: Borrow<CapabilitySample>>(samples: &[S]) -> Vec<i32> {
    let years: BTreeSet<i32> = samples
        .iter()
        .map(<S as Borrow<CapabilitySample>>::borrow)
        .flat_map(|s| s.heights.keys().copied())
        .collect();
    years.into_iter().collect()
}
