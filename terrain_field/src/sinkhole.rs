//! Sinkhole geometry for under-performing capabilities, plus severity
//! scoring for task-level failure evaluations.

use std::collections::BTreeMap;
use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::classify::Rgb;
use crate::dataset::{CapabilitySample, Position};
use crate::overview::OverviewFrame;
use crate::spline::{CatmullRom, CurveKind};
use crate::TerrainError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RingParams {
    pub segments: usize,
    pub divisions: usize,
    pub min_radius: f64,
    pub radius_scale: f64,
    pub min_depth: f64,
    pub depth_scale: f64,
    pub curve: CurveKind,
}

impl Default for RingParams {
    fn default() -> Self {
        Self {
            segments: 40,
            divisions: 100,
            min_radius: 6.0,
            radius_scale: 350.0,
            min_depth: 6.0,
            depth_scale: 120.0,
            curve: CurveKind::Centripetal,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SinkholeRing {
    pub key: String,
    pub center: [f64; 3],
    pub radius: f64,
    pub depth: f64,
    /// Closed polyline; the last point repeats the first.
    pub points: Vec<[f64; 3]>,
}

pub fn is_sinkhole(level: f64, threshold: f64) -> bool {
    level >= 0.0 && level < threshold
}

pub fn ring_radius(level: f64, threshold: f64, params: &RingParams) -> f64 {
    ((threshold - level) * params.radius_scale).max(params.min_radius)
}

pub fn ring_depth(level: f64, threshold: f64, params: &RingParams) -> f64 {
    ((threshold - level) * params.depth_scale).max(params.min_depth)
}

/// Ring around `sample` at `level`, or `None` when the level is not a sinkhole.
pub fn build_ring(
    sample: &CapabilitySample,
    level: f64,
    threshold: f64,
    params: &RingParams,
    frame: &OverviewFrame,
) -> Option<SinkholeRing> {
    if !is_sinkhole(level, threshold) {
        return None;
    }
    let center = frame.world_point(sample.position, level);
    let radius = ring_radius(level, threshold, params);
    let depth = ring_depth(level, threshold, params);

    let segments = params.segments.max(3);
    let control: Vec<[f64; 3]> = (0..segments)
        .map(|k| {
            let a = k as f64 / segments as f64 * TAU;
            [
                center[0] + a.cos() * radius,
                center[1] - a.sin().abs() * depth,
                center[2] + a.sin() * radius,
            ]
        })
        .collect();
    let points = CatmullRom::new(control, true, params.curve).sample(params.divisions);

    Some(SinkholeRing {
        key: sample.key.clone(),
        center,
        radius,
        depth,
        points,
    })
}

pub fn build_rings(
    resolved: &[(&CapabilitySample, f64)],
    threshold: f64,
    params: &RingParams,
    frame: &OverviewFrame,
) -> Vec<SinkholeRing> {
    resolved
        .iter()
        .filter_map(|(sample, level)| build_ring(sample, *level, threshold, params, frame))
        .collect()
}

// ---------------------------------------------------------------------------
// Failure evaluations

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SinkholeEvaluation {
    pub task: String,
    #[serde(default = "unknown_category")]
    pub category: String,
    #[serde(default)]
    pub expected_answer: String,
    /// Model name -> answered correctly.
    #[serde(default)]
    pub results: BTreeMap<String, bool>,
}

fn unknown_category() -> String {
    "unknown".to_string()
}

impl SinkholeEvaluation {
    pub fn failed_models(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, &ok)| !ok)
            .map(|(m, _)| m.as_str())
            .collect()
    }

    pub fn passed_models(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, &ok)| ok)
            .map(|(m, _)| m.as_str())
            .collect()
    }
}

/// Accepts a JSON list of evaluations or `{"sinkholes": [...]}`; unreadable
/// entries are skipped.
pub fn parse_evaluations(input: &[u8]) -> Result<Vec<SinkholeEvaluation>, TerrainError> {
    let json: JsonValue =
        serde_json::from_slice(input).map_err(|e| TerrainError::DatasetParse(e.to_string()))?;
    let items = match json {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut root) => match root.remove("sinkholes") {
            Some(JsonValue::Array(items)) => items,
            _ => {
                return Err(TerrainError::DatasetParse(
                    "expected a list of sinkhole evaluations".into(),
                ))
            }
        },
        _ => {
            return Err(TerrainError::DatasetParse(
                "expected a list of sinkhole evaluations".into(),
            ))
        }
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<SinkholeEvaluation>(item) {
            Ok(eval) => out.push(eval),
            Err(e) => warn!("skipping sinkhole evaluation #{}: {}", idx, e),
        }
    }
    Ok(out)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// No recorded results counts as `Low`.
    pub fn from_failures(failed: usize, total: usize) -> Severity {
        if total == 0 {
            return Severity::Low;
        }
        let ratio = failed as f64 / total as f64;
        if failed == total {
            Severity::Critical
        } else if ratio >= 0.75 {
            Severity::High
        } else if ratio >= 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn base_depth(self) -> f64 {
        match self {
            Severity::Critical => -80.0,
            Severity::High => -60.0,
            Severity::Medium => -40.0,
            Severity::Low => -20.0,
        }
    }

    pub fn color(self) -> Rgb {
        match self {
            Severity::Critical => Rgb::new(0.9, 0.1, 0.1),
            Severity::High => Rgb::new(1.0, 0.3, 0.1),
            Severity::Medium => Rgb::new(1.0, 0.5, 0.0),
            Severity::Low => Rgb::new(1.0, 0.65, 0.2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Normalized anchor for a failure category; unknown categories sit at the center.
pub fn category_anchor(category: &str) -> Position {
    let (x, y) = match category {
        "constrained_generation" | "string_manipulation" => (0.2, 0.3),
        "spatial_reasoning" => (0.55, 0.25),
        "retroactive_reasoning" => (0.65, 0.45),
        "self_reference" => (0.7, 0.4),
        "logic_puzzle" => (0.45, 0.55),
        "physical_reasoning" => (0.5, 0.5),
        "temporal" => (0.4, 0.5),
        "arithmetic" => (0.75, 0.45),
        "counting" => (0.4, 0.4),
        _ => (0.5, 0.5),
    };
    Position { x, y }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlacedSinkhole {
    pub task: String,
    pub category: String,
    pub position: Position,
    pub depth: f64,
    pub severity: Severity,
    pub color: Rgb,
    pub failed_models: Vec<String>,
    pub passed_models: Vec<String>,
}

pub fn place(eval: &SinkholeEvaluation) -> PlacedSinkhole {
    let failed = eval.failed_models();
    let severity = Severity::from_failures(failed.len(), eval.results.len());
    PlacedSinkhole {
        task: eval.task.clone(),
        category: eval.category.clone(),
        position: category_anchor(&eval.category),
        depth: severity.base_depth() - 5.0 * failed.len() as f64,
        severity,
        color: severity.color(),
        failed_models: failed.iter().map(|m| m.to_string()).collect(),
        passed_models: eval.passed_models().iter().map(|m| m.to_string()).collect(),
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SinkholeSummary {
    pub sinkholes: Vec<PlacedSinkhole>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<String, usize>,
}

pub fn summarize_evaluations(evals: &[SinkholeEvaluation]) -> SinkholeSummary {
    let mut summary = SinkholeSummary::default();
    for eval in evals {
        let placed = place(eval);
        *summary.by_severity.entry(placed.severity).or_insert(0) += 1;
        *summary
            .by_category
            .entry(placed.category.clone())
            .or_insert(0) += 1;
        summary.sinkholes.push(placed);
    }
    summary
}
