//! Scattered-data terrain field generation for AI capability maps.
//!
//! Sparse capability samples (a normalized 2-D position plus a level per year)
//! are turned into a dense height/color lattice, sinkhole rings, trend curves,
//! a relation graph over shared top models, and radial forecast placements.
//! Everything here is a pure function of its inputs; rendering is left to the
//! caller.

pub mod cache;
pub mod classify;
pub mod dataset;
pub mod forecast;
pub mod interpolate;
pub mod overview;
pub mod relation;
pub mod sinkhole;
pub mod spline;
pub mod stats;
pub mod temporal;
pub mod trend;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use cache::{fingerprint, FieldCache, FieldKey};
pub use classify::{classify, Band, BandThresholds, ColorField, Rgb};
pub use dataset::{CapabilitySample, Dataset, Position};
pub use forecast::{ForecastEntry, ForecastNode, RadialParams};
pub use interpolate::{build_height_field, BucketPolicy, GridSpec, HeightField, Kernel};
pub use overview::{CategoryConfig, ConnectionSegment, Marker, OverviewFrame};
pub use relation::{build_relations, related_to, RelationEdge};
pub use sinkhole::{build_ring, RingParams, SinkholeRing};
pub use stats::FieldStats;
pub use temporal::{resolve_level, DEFAULT_LEVEL};
pub use trend::{TrendCurve, Velocity};

/// Normalized level under which a capability counts as a sinkhole.
pub const DEFAULT_SINKHOLE_THRESHOLD: f64 = 0.12;

#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("failed to parse dataset: {0}")]
    DatasetParse(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("insufficient data for computation")]
    InsufficientData,
}

/// Grid and kernel settings for the interpolated terrain.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainParams {
    pub grid_resolution: usize,
    pub world_size: f64,
    pub height_scale: f64,
    pub search_radius: usize,
    pub bucket_policy: BucketPolicy,
    pub kernel: Kernel,
    /// World-unit distance over which band colors bleed into their neighbors.
    pub blend_span: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            grid_resolution: 100,
            world_size: 100.0,
            height_scale: 30.0,
            search_radius: interpolate::DEFAULT_SEARCH_RADIUS,
            bucket_policy: BucketPolicy::LastWins,
            kernel: Kernel::default(),
            blend_span: 1.0,
        }
    }
}

impl TerrainParams {
    pub fn grid_spec(&self) -> GridSpec {
        GridSpec {
            resolution: self.grid_resolution,
            world_size: self.world_size,
            height_scale: self.height_scale,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    pub year: i32,
    pub filter_category: Option<String>,
    pub sinkhole_threshold: f64,
    pub years: Vec<i32>,
    pub terrain: TerrainParams,
    pub ring: RingParams,
    pub overview: OverviewFrame,
    pub radial: RadialParams,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            year: 2025,
            filter_category: None,
            sinkhole_threshold: DEFAULT_SINKHOLE_THRESHOLD,
            years: temporal::DEFAULT_YEARS.to_vec(),
            terrain: TerrainParams::default(),
            ring: RingParams::default(),
            overview: OverviewFrame::default(),
            radial: RadialParams::default(),
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), TerrainError> {
        self.terrain.grid_spec().validate()?;
        if !self.sinkhole_threshold.is_finite() || self.sinkhole_threshold <= 0.0 {
            return Err(TerrainError::InvalidParameter(format!(
                "sinkhole threshold must be positive, got {}",
                self.sinkhole_threshold
            )));
        }
        if !self.terrain.kernel.falloff.is_finite() || self.terrain.kernel.falloff <= 0.0 {
            return Err(TerrainError::InvalidParameter(
                "kernel falloff must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn band_thresholds(&self) -> Result<BandThresholds, TerrainError> {
        BandThresholds::from_levels(self.terrain.height_scale, self.sinkhole_threshold)
    }
}

/// Per-sample summary of where a capability landed in the current pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SampleSummary {
    pub key: String,
    pub category: String,
    pub level: f64,
    /// Interpolated height of the lattice node the sample was bucketed into.
    pub terrain_height: f64,
    /// Band of that node; a sample always covers its own node.
    pub band: Band,
    pub sinkhole: bool,
    pub velocity: Velocity,
    /// Category color, darkened for slow or regressing capabilities.
    pub color: Rgb,
}

/// Everything derived from one (dataset, year, filter, grid) pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerrainSnapshot {
    pub year: i32,
    pub filter_category: Option<String>,
    pub field: HeightField,
    pub colors: ColorField,
    pub stats: FieldStats,
    pub samples: Vec<SampleSummary>,
    pub rings: Vec<SinkholeRing>,
    pub edges: Vec<RelationEdge>,
    pub trends: Vec<TrendCurve>,
    pub markers: Vec<Marker>,
    /// Marker-to-marker segments for every relation edge.
    pub connections: Vec<ConnectionSegment>,
}

/// Run the full terrain pipeline over an immutable dataset snapshot.
pub fn compute_terrain(
    dataset: &Dataset,
    categories: &CategoryConfig,
    params: &Params,
) -> Result<TerrainSnapshot, TerrainError> {
    params.validate()?;
    let thresholds = params.band_thresholds()?;
    let spec = params.terrain.grid_spec();

    let active = dataset.filtered(params.filter_category.as_deref());
    let resolved: Vec<(&CapabilitySample, f64)> = active
        .iter()
        .map(|sample| (*sample, resolve_level(sample, params.year)))
        .collect();
    debug!(
        "terrain pass: year {}, {} of {} samples active",
        params.year,
        resolved.len(),
        dataset.len()
    );

    let points: Vec<(Position, f64)> = resolved
        .iter()
        .map(|(sample, level)| (sample.position, *level))
        .collect();
    let field = build_height_field(
        &points,
        &spec,
        params.terrain.search_radius,
        params.terrain.bucket_policy,
        params.terrain.kernel,
    )?;
    let colors = classify::color_field(
        &field,
        &thresholds,
        params.terrain.kernel,
        params.terrain.blend_span,
    );
    let stats = FieldStats::from_field(&field, &colors);

    let samples = resolved
        .iter()
        .map(|(sample, level)| {
            let terrain_height = field.height_at(sample.position);
            let velocity = trend::velocity(sample);
            SampleSummary {
                key: sample.key.clone(),
                category: sample.category.clone(),
                level: *level,
                terrain_height,
                band: thresholds.band(terrain_height),
                sinkhole: sinkhole::is_sinkhole(*level, params.sinkhole_threshold),
                velocity,
                color: trend::velocity_tint(
                    categories.color_for(&sample.category),
                    velocity.velocity,
                ),
            }
        })
        .collect();

    let rings = sinkhole::build_rings(
        &resolved,
        params.sinkhole_threshold,
        &params.ring,
        &params.overview,
    );
    let edges = build_relations(&active);
    let trends = trend::trend_curves(&active, &params.years, &params.overview);
    let markers = overview::markers(
        &resolved,
        params.year,
        &params.years,
        categories,
        &params.overview,
        params.sinkhole_threshold,
    );
    let connections = overview::connection_segments(&markers, &edges);

    Ok(TerrainSnapshot {
        year: params.year,
        filter_category: params.filter_category.clone(),
        field,
        colors,
        stats,
        samples,
        rings,
        edges,
        trends,
        markers,
        connections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_sample_dataset() -> Dataset {
        Dataset::from_samples(vec![
            CapabilitySample::new("a", "reasoning", Position::new(0.25, 0.25).unwrap())
                .with_height(2025, 0.05),
            CapabilitySample::new("b", "coding", Position::new(0.75, 0.75).unwrap())
                .with_height(2025, 0.9),
        ])
    }

    #[test]
    fn two_sample_scenario() {
        let dataset = two_sample_dataset();
        let params = Params::default();
        let snapshot = compute_terrain(&dataset, &CategoryConfig::default(), &params).unwrap();

        assert_eq!(snapshot.rings.len(), 1);
        assert_eq!(snapshot.rings[0].key, "a");

        let b = snapshot.samples.iter().find(|s| s.key == "b").unwrap();
        assert_eq!(b.band, Band::Peak);
        assert!(!b.sinkhole);
        let a = snapshot.samples.iter().find(|s| s.key == "a").unwrap();
        assert!(a.sinkhole);
        // a single recorded year has no velocity, so the category color is untouched
        assert_eq!(a.velocity, Velocity::default());
        assert_eq!(a.color, Rgb::from_hex(overview::UNKNOWN_CATEGORY_COLOR));

        assert!(snapshot.edges.is_empty());
        assert!(snapshot.connections.is_empty());
        assert_eq!(snapshot.markers.len(), 2);
        assert_eq!(snapshot.trends.len(), 2);
    }

    #[test]
    fn empty_dataset_yields_fallback_terrain() {
        let params = Params::default();
        let snapshot =
            compute_terrain(&Dataset::default(), &CategoryConfig::default(), &params).unwrap();
        let nodes = (params.terrain.grid_resolution + 1).pow(2);
        assert_eq!(snapshot.stats.fallback_nodes, nodes);
        assert!(snapshot.rings.is_empty());
        assert!(snapshot.edges.is_empty());
        assert!(snapshot.samples.is_empty());
        assert!(snapshot.stats.max_height <= 2.0);
        assert!(snapshot.stats.min_height >= -2.0);
        // no data is not a sinkhole
        assert!(snapshot.stats.band_counts.is_empty());
        assert!(snapshot.colors.bands.iter().all(Option::is_none));
        assert!(snapshot
            .colors
            .colors
            .iter()
            .all(|c| *c == Rgb::from_hex(classify::BASE_COLOR)));
    }

    #[test]
    fn wide_sinkhole_threshold_still_builds_terrain() {
        let dataset = Dataset::from_samples(vec![
            CapabilitySample::new("a", "reasoning", Position::new(0.25, 0.25).unwrap())
                .with_height(2025, 0.32),
            CapabilitySample::new("b", "coding", Position::new(0.75, 0.75).unwrap())
                .with_height(2025, 0.9),
        ]);
        let params = Params {
            sinkhole_threshold: 0.35,
            ..Params::default()
        };
        let snapshot = compute_terrain(&dataset, &CategoryConfig::default(), &params).unwrap();
        assert_eq!(snapshot.rings.len(), 1);
        assert_eq!(snapshot.rings[0].key, "a");
        let a = snapshot.samples.iter().find(|s| s.key == "a").unwrap();
        assert!(a.sinkhole);
        // the band still follows the capped table: 0.32 * 30 = 9.6 is grassland
        assert_eq!(a.band, Band::Grassland);
        assert!((a.terrain_height - 9.6).abs() < 1e-9);
    }

    #[test]
    fn category_filter_restricts_samples() {
        let dataset = two_sample_dataset();
        let params = Params {
            filter_category: Some("coding".into()),
            ..Params::default()
        };
        let snapshot = compute_terrain(&dataset, &CategoryConfig::default(), &params).unwrap();
        assert_eq!(snapshot.samples.len(), 1);
        assert_eq!(snapshot.samples[0].key, "b");
        assert!(snapshot.rings.is_empty());
    }

    #[test]
    fn rejects_zero_resolution() {
        let mut params = Params::default();
        params.terrain.grid_resolution = 0;
        let err = compute_terrain(&Dataset::default(), &CategoryConfig::default(), &params);
        assert!(matches!(err, Err(TerrainError::InvalidParameter(_))));
    }

    #[test]
    fn params_round_trip_with_defaults() {
        let params: Params = serde_json::from_str(r#"{"year": 2022}"#).unwrap();
        assert_eq!(params.year, 2022);
        assert_eq!(params.terrain.search_radius, 3);
        assert_eq!(params.sinkhole_threshold, DEFAULT_SINKHOLE_THRESHOLD);
    }
}
