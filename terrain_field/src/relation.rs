//! Edges between capabilities that share top-performing models.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::dataset::CapabilitySample;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationEdge {
    pub from: String,
    pub to: String,
    /// Number of shared top models, always at least 1.
    pub overlap: usize,
}

/// Shared top models between two samples; 0 when either has none recorded.
pub fn overlap_count(a: &CapabilitySample, b: &CapabilitySample) -> usize {
    match (&a.top_models, &b.top_models) {
        (Some(ma), Some(mb)) => ma.intersection(mb).count(),
        _ => 0,
    }
}

fn edges_from<S: Borrow<CapabilitySample>>(
    from: &CapabilitySample,
    samples: &[S],
) -> Vec<RelationEdge> {
    samples
        .iter()
        .map(<S as Borrow<CapabilitySample>>::borrow)
        .filter(|other| other.key != from.key)
        .filter_map(|other| {
            let overlap = overlap_count(from, other);
            (overlap > 0).then(|| RelationEdge {
                from: from.key.clone(),
                to: other.key.clone(),
                overlap,
            })
        })
        .collect()
}

/// Every ordered pair `(A, B)` with shared models, in input order.
///
/// Each unordered relation therefore appears twice, once from each side.
pub fn build_relations<S: Borrow<CapabilitySample>>(samples: &[S]) -> Vec<RelationEdge> {
    samples
        .iter()
        .flat_map(|sample| edges_from(sample.borrow(), samples))
        .collect()
}

/// Edges starting at `key`; empty when the key is not among `samples`.
pub fn related_to<S: Borrow<CapabilitySample>>(key: &str, samples: &[S]) -> Vec<RelationEdge> {
    match samples.iter().map(<S as Borrow<CapabilitySample>>::borrow).find(|s| s.key == key) {
        Some(sample) => edges_from(sample, samples),
        None => Vec::new(),
    }
}
