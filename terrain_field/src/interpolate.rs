//! Bounded-kernel interpolation of scattered samples onto a regular lattice.
//!
//! Samples are bucketed into the same cells the lattice is indexed by. Each
//! lattice node then averages the buckets within `search_radius` cells,
//! weighted by [`Kernel::weight`] of the cell-offset distance. Nodes with no
//! bucket in range fall back to a low-amplitude procedural surface, so the
//! cost is `O(nodes * (2r + 1)^2)` regardless of the sample count.

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::Position;
use crate::TerrainError;

pub const DEFAULT_SEARCH_RADIUS: usize = 3;

/// Exponential distance falloff `exp(-d / falloff)`; not normalized.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Kernel {
    pub falloff: f64,
}

impl Default for Kernel {
    fn default() -> Self {
        Self { falloff: 2.0 }
    }
}

impl Kernel {
    pub fn weight(&self, distance: f64) -> f64 {
        (-distance / self.falloff).exp()
    }
}

/// What to do when several samples land in the same cell.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BucketPolicy {
    /// The later sample replaces the earlier one.
    #[default]
    LastWins,
    /// Colliding sample heights are averaged.
    Average,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GridSpec {
    /// Segments per axis; the lattice has `resolution + 1` nodes per axis.
    pub resolution: usize,
    pub world_size: f64,
    /// World units per unit of normalized level.
    pub height_scale: f64,
}

impl GridSpec {
    pub fn validate(&self) -> Result<(), TerrainError> {
        if self.resolution == 0 {
            return Err(TerrainError::InvalidParameter(
                "grid resolution must be at least 1".into(),
            ));
        }
        if !self.world_size.is_finite() || self.world_size <= 0.0 {
            return Err(TerrainError::InvalidParameter(format!(
                "world size must be positive, got {}",
                self.world_size
            )));
        }
        if !self.height_scale.is_finite() || self.height_scale <= 0.0 {
            return Err(TerrainError::InvalidParameter(format!(
                "height scale must be positive, got {}",
                self.height_scale
            )));
        }
        Ok(())
    }

    pub fn nodes_per_axis(&self) -> usize {
        self.resolution + 1
    }

    /// World coordinate of lattice index `index` along either axis.
    pub fn world_coord(&self, index: usize) -> f64 {
        (index as f64 / self.resolution as f64 - 0.5) * self.world_size
    }

    /// Cell a normalized position falls into; boundaries round down.
    pub fn bucket(&self, position: Position) -> (usize, usize) {
        let res = self.resolution as f64;
        let cell = |v: f64| ((v * res).floor().max(0.0) as usize).min(self.resolution);
        (cell(position.x), cell(position.y))
    }
}

/// Smooth filler for nodes no sample reaches, bounded to `[-2, 2]`.
pub fn fallback_height(world_x: f64, world_z: f64) -> f64 {
    (world_x * 0.1).sin() * (world_z * 0.1).cos() * 2.0
}

/// Interpolated heights and accumulated weights, indexed `[j, i]` (row = z).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeightField {
    pub spec: GridSpec,
    pub search_radius: usize,
    pub heights: Array2<f64>,
    pub influence: Array2<f64>,
}

impl HeightField {
    pub fn dims(&self) -> (usize, usize) {
        let n = self.spec.nodes_per_axis();
        (n, n)
    }

    pub fn height(&self, i: usize, j: usize) -> f64 {
        self.heights[[j, i]]
    }

    pub fn influence(&self, i: usize, j: usize) -> f64 {
        self.influence[[j, i]]
    }

    pub fn world_position(&self, i: usize, j: usize) -> [f64; 3] {
        [
            self.spec.world_coord(i),
            self.height(i, j),
            self.spec.world_coord(j),
        ]
    }

    /// Height at the node a normalized position is bucketed into.
    pub fn height_at(&self, position: Position) -> f64 {
        let (i, j) = self.spec.bucket(position);
        self.height(i, j)
    }
}

#[derive(Clone, Copy, Debug)]
struct Bucket {
    sum: f64,
    count: usize,
}

impl Bucket {
    fn height(&self) -> f64 {
        self.sum / self.count as f64
    }
}

fn bucket_samples(
    samples: &[(Position, f64)],
    spec: &GridSpec,
    policy: BucketPolicy,
) -> HashMap<(usize, usize), Bucket> {
    let mut buckets: HashMap<(usize, usize), Bucket> = HashMap::with_capacity(samples.len());
    for (position, level) in samples {
        let cell = spec.bucket(*position);
        let height = level * spec.height_scale;
        match buckets.get_mut(&cell) {
            Some(existing) => {
                debug!(
                    "bucket collision at cell ({}, {}), policy {:?}",
                    cell.0, cell.1, policy
                );
                match policy {
                    BucketPolicy::LastWins => {
                        *existing = Bucket {
                            sum: height,
                            count: 1,
                        }
                    }
                    BucketPolicy::Average => {
                        existing.sum += height;
                        existing.count += 1;
                    }
                }
            }
            None => {
                buckets.insert(
                    cell,
                    Bucket {
                        sum: height,
                        count: 1,
                    },
                );
            }
        }
    }
    buckets
}

/// Interpolate `(position, level)` samples onto the lattice described by `spec`.
pub fn build_height_field(
    samples: &[(Position, f64)],
    spec: &GridSpec,
    search_radius: usize,
    policy: BucketPolicy,
    kernel: Kernel,
) -> Result<HeightField, TerrainError> {
    spec.validate()?;
    let n = spec.nodes_per_axis();
    let buckets = bucket_samples(samples, spec, policy);
    let radius = search_radius as isize;

    let mut heights = Array2::<f64>::zeros((n, n));
    let mut influence = Array2::<f64>::zeros((n, n));

    for j in 0..n {
        for i in 0..n {
            let mut height = 0.0;
            let mut total_weight = 0.0;
            if !buckets.is_empty() {
                for di in -radius..=radius {
                    let ci = i as isize + di;
                    if ci < 0 {
                        continue;
                    }
                    for dj in -radius..=radius {
                        let cj = j as isize + dj;
                        if cj < 0 {
                            continue;
                        }
                        if let Some(bucket) = buckets.get(&(ci as usize, cj as usize)) {
                            let distance = ((di * di + dj * dj) as f64).sqrt();
                            let weight = kernel.weight(distance);
                            height += bucket.height() * weight;
                            total_weight += weight;
                        }
                    }
                }
            }

            heights[[j, i]] = if total_weight > 0.0 {
                height / total_weight
            } else {
                fallback_height(spec.world_coord(i), spec.world_coord(j))
            };
            influence[[j, i]] = total_weight;
        }
    }

    Ok(HeightField {
        spec: *spec,
        search_radius,
        heights,
        influence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spec(resolution: usize) -> GridSpec {
        GridSpec {
            resolution,
            world_size: 100.0,
            height_scale: 30.0,
        }
    }

    fn pos(x: f64, y: f64) -> Position {
        Position::new(x, y).unwrap()
    }

    #[test]
    fn isolated_sample_keeps_its_height() {
        let spec = spec(100);
        let field = build_height_field(
            &[(pos(0.25, 0.25), 0.4)],
            &spec,
            3,
            BucketPolicy::LastWins,
            Kernel::default(),
        )
        .unwrap();
        assert_relative_eq!(field.height(25, 25), 0.4 * 30.0, epsilon = 1e-12);
        assert_relative_eq!(field.influence(25, 25), 1.0, epsilon = 1e-12);
        // neighbors inside the radius see only this sample too
        assert_relative_eq!(field.height(27, 24), 0.4 * 30.0, epsilon = 1e-12);
    }

    #[test]
    fn weights_follow_kernel() {
        let spec = spec(100);
        let field = build_height_field(
            &[(pos(0.10, 0.10), 0.0), (pos(0.12, 0.10), 1.0)],
            &spec,
            3,
            BucketPolicy::LastWins,
            Kernel::default(),
        )
        .unwrap();
        // node (11, 10) is one cell from each sample: equal weights
        assert_relative_eq!(field.height(11, 10), 15.0, epsilon = 1e-12);
        let w1 = (-0.5f64).exp();
        assert_relative_eq!(field.influence(11, 10), 2.0 * w1, epsilon = 1e-12);
        // node (10, 10): own sample weight 1, other at distance 2
        let w2 = (-1.0f64).exp();
        assert_relative_eq!(field.height(10, 10), 30.0 * w2 / (1.0 + w2), epsilon = 1e-12);
    }

    #[test]
    fn empty_input_is_pure_fallback() {
        let spec = spec(20);
        let field =
            build_height_field(&[], &spec, 3, BucketPolicy::LastWins, Kernel::default()).unwrap();
        assert_eq!(field.dims(), (21, 21));
        for j in 0..21 {
            for i in 0..21 {
                assert_eq!(field.influence(i, j), 0.0);
                let expected = fallback_height(spec.world_coord(i), spec.world_coord(j));
                assert_eq!(field.height(i, j), expected);
                assert!(field.height(i, j).abs() <= 2.0);
            }
        }
    }

    #[test]
    fn zero_radius_only_touches_own_cell() {
        let spec = spec(10);
        let field = build_height_field(
            &[(pos(0.5, 0.5), 0.5)],
            &spec,
            0,
            BucketPolicy::LastWins,
            Kernel::default(),
        )
        .unwrap();
        assert_eq!(field.height(5, 5), 15.0);
        assert_eq!(field.influence(6, 5), 0.0);
        assert_eq!(
            field.height(6, 5),
            fallback_height(spec.world_coord(6), spec.world_coord(5))
        );
    }

    #[test]
    fn boundary_positions_round_down() {
        let spec = spec(10);
        assert_eq!(spec.bucket(pos(0.3, 0.0)), (3, 0));
        assert_eq!(spec.bucket(pos(0.39, 0.999)), (3, 9));
        assert_eq!(spec.bucket(pos(1.0, 1.0)), (10, 10));
    }

    #[test]
    fn collisions_follow_policy() {
        let spec = spec(10);
        let samples = [(pos(0.51, 0.51), 0.2), (pos(0.55, 0.55), 0.6)];
        let last = build_height_field(
            &samples,
            &spec,
            0,
            BucketPolicy::LastWins,
            Kernel::default(),
        )
        .unwrap();
        assert_relative_eq!(last.height(5, 5), 0.6 * 30.0, epsilon = 1e-12);

        let avg =
            build_height_field(&samples, &spec, 0, BucketPolicy::Average, Kernel::default())
                .unwrap();
        assert_relative_eq!(avg.height(5, 5), 0.4 * 30.0, epsilon = 1e-9);
    }

    #[test]
    fn identical_inputs_give_identical_bits() {
        let spec = spec(60);
        let samples = [
            (pos(0.1, 0.9), 0.3),
            (pos(0.45, 0.52), 0.81),
            (pos(0.47, 0.5), 0.05),
            (pos(0.9, 0.2), 1.7),
        ];
        let a = build_height_field(&samples, &spec, 3, BucketPolicy::LastWins, Kernel::default())
            .unwrap();
        let b = build_height_field(&samples, &spec, 3, BucketPolicy::LastWins, Kernel::default())
            .unwrap();
        let bits = |f: &HeightField| f.heights.iter().map(|h| h.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
        assert_eq!(a.influence, b.influence);
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let spec = spec(0);
        assert!(build_height_field(&[], &spec, 3, BucketPolicy::LastWins, Kernel::default())
            .is_err());
    }
}
