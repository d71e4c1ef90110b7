//! Summary statistics over an interpolated field.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::classify::{Band, ColorField};
use crate::interpolate::HeightField;

/// Summary of an interpolated field.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldStats {
    pub min_height: f64,
    pub max_height: f64,
    pub mean_height: f64,
    pub p01: f64,
    pub p99: f64,
    /// Nodes no sample reached (procedural fallback).
    pub fallback_nodes: usize,
    pub total_nodes: usize,
    /// Covered nodes per band; fallback nodes are not counted.
    pub band_counts: BTreeMap<Band, usize>,
}

fn percentile(sorted: &[OrderedFloat<f64>], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)].into_inner()
}

impl FieldStats {
    pub fn from_field(field: &HeightField, colors: &ColorField) -> Self {
        let mut sorted: Vec<OrderedFloat<f64>> =
            field.heights.iter().copied().map(OrderedFloat).collect();
        sorted.sort_unstable();
        if sorted.is_empty() {
            return Self::default();
        }

        let total_nodes = sorted.len();
        let sum: f64 = field.heights.iter().sum();
        let fallback_nodes = field.influence.iter().filter(|&&w| w <= 0.0).count();

        let mut band_counts = BTreeMap::new();
        for band in colors.bands.iter().flatten() {
            *band_counts.entry(*band).or_insert(0) += 1;
        }

        Self {
            min_height: sorted[0].into_inner(),
            max_height: sorted[total_nodes - 1].into_inner(),
            mean_height: sum / total_nodes as f64,
            p01: percentile(&sorted, 0.01),
            p99: percentile(&sorted, 0.99),
            fallback_nodes,
            total_nodes,
            band_counts,
        }
    }

    /// Share of nodes covered by at least one sample.
    pub fn coverage(&self) -> f64 {
        if self.total_nodes == 0 {
            return 0.0;
        }
        1.0 - self.fallback_nodes as f64 / self.total_nodes as f64
    }
}
