//! Overview-scene placement: capability markers, category colors and the
//! segments linking related capabilities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::classify::Rgb;
use crate::dataset::{CapabilitySample, Position};
use crate::relation::RelationEdge;
use crate::TerrainError;

/// Marker color for capabilities under the sinkhole threshold.
pub const BELOW_THRESHOLD_COLOR: u32 = 0xff3333;
/// Color for categories missing from the configuration.
pub const UNKNOWN_CATEGORY_COLOR: u32 = 0x888888;

/// Maps normalized positions and levels into the overview scene.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverviewFrame {
    pub size: f64,
    pub base_height: f64,
    pub vertical_scale: f64,
    /// Horizontal spread between consecutive years of a trend line.
    pub year_spacing: f64,
    /// Z offset of trend lines and markers off the terrain plane.
    pub marker_lift: f64,
}

impl Default for OverviewFrame {
    fn default() -> Self {
        Self {
            size: 1200.0,
            base_height: -200.0,
            vertical_scale: 600.0,
            year_spacing: 12.0,
            marker_lift: 6.0,
        }
    }
}

impl OverviewFrame {
    pub fn world_point(&self, position: Position, level: f64) -> [f64; 3] {
        [
            (position.x - 0.5) * self.size,
            self.base_height + level * self.vertical_scale,
            (position.y - 0.5) * self.size,
        ]
    }

    /// X offset of the `index`-th of `count` years, centered on the middle year.
    pub fn year_offset(&self, index: usize, count: usize) -> f64 {
        if count == 0 {
            return 0.0;
        }
        (index as f64 - (count as f64 - 1.0) / 2.0) * self.year_spacing
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryStyle {
    pub display_name: Option<String>,
    pub color: Option<[f64; 3]>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryConfig {
    pub categories: BTreeMap<String, CategoryStyle>,
}

impl CategoryConfig {
    /// Accepts `{"capability_categories": {...}}` or the bare category map.
    pub fn parse_json(input: &[u8]) -> Result<Self, TerrainError> {
        let json: JsonValue =
            serde_json::from_slice(input).map_err(|e| TerrainError::DatasetParse(e.to_string()))?;
        let map = match json {
            JsonValue::Object(mut root) => match root.remove("capability_categories") {
                Some(JsonValue::Object(inner)) => inner,
                Some(_) => {
                    return Err(TerrainError::DatasetParse(
                        "capability_categories must be an object".into(),
                    ))
                }
                None => root,
            },
            _ => {
                return Err(TerrainError::DatasetParse(
                    "category config must be a JSON object".into(),
                ))
            }
        };

        let mut config = CategoryConfig::default();
        for (key, value) in map {
            match serde_json::from_value::<CategoryStyle>(value) {
                Ok(style) => {
                    config.categories.insert(key, style);
                }
                Err(e) => warn!("ignoring category '{}': {}", key, e),
            }
        }
        Ok(config)
    }

    pub fn color_for(&self, category: &str) -> Rgb {
        match self.categories.get(category).and_then(|s| s.color) {
            Some([r, g, b]) => Rgb::new(r, g, b),
            None => Rgb::from_hex(UNKNOWN_CATEGORY_COLOR),
        }
    }

    pub fn display_name(&self, category: &str) -> String {
        self.categories
            .get(category)
            .and_then(|s| s.display_name.clone())
            .unwrap_or_else(|| category.to_string())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    pub key: String,
    pub label: String,
    pub category: String,
    pub level: f64,
    pub position: [f64; 3],
    /// Display color: red below the sinkhole threshold, else the category color.
    pub color: Rgb,
    pub category_color: Rgb,
    pub below_threshold: bool,
}

/// One marker per resolved sample, offset along x by the year's slot in `years`.
///
/// A year outside `years` gets no offset.
pub fn markers(
    resolved: &[(&CapabilitySample, f64)],
    year: i32,
    years: &[i32],
    categories: &CategoryConfig,
    frame: &OverviewFrame,
    threshold: f64,
) -> Vec<Marker> {
    let offset = years
        .iter()
        .position(|&y| y == year)
        .map_or(0.0, |idx| frame.year_offset(idx, years.len()));

    resolved
        .iter()
        .map(|(sample, level)| {
            let [x, y, z] = frame.world_point(sample.position, *level);
            let category_color = categories.color_for(&sample.category);
            let below_threshold = *level < threshold;
            Marker {
                key: sample.key.clone(),
                label: sample.display_name(),
                category: sample.category.clone(),
                level: *level,
                position: [x + offset, y, z + frame.marker_lift],
                color: if below_threshold {
                    Rgb::from_hex(BELOW_THRESHOLD_COLOR)
                } else {
                    category_color
                },
                category_color,
                below_threshold,
            }
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSegment {
    pub from: String,
    pub to: String,
    pub start: [f64; 3],
    pub end: [f64; 3],
    pub color: Rgb,
    pub overlap: usize,
}

/// Marker-to-marker segments for every edge whose endpoints both have markers.
pub fn connection_segments(markers: &[Marker], edges: &[RelationEdge]) -> Vec<ConnectionSegment> {
    let by_key: BTreeMap<&str, &Marker> = markers.iter().map(|m| (m.key.as_str(), m)).collect();
    edges
        .iter()
        .filter_map(|edge| {
            let from = by_key.get(edge.from.as_str())?;
            let to = by_key.get(edge.to.as_str())?;
            Some(ConnectionSegment {
                from: edge.from.clone(),
                to: edge.to.clone(),
                start: from.position,
                end: to.position,
                color: from.category_color,
                overlap: edge.overlap,
            })
        })
        .collect()
}
