//! Breakthrough forecasts: logistic fits over benchmark history, threshold
//! date prediction, and the radial placement of forecast markers.

use std::f64::consts::TAU;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::classify::Rgb;
use crate::TerrainError;

pub const DEFAULT_THRESHOLDS: [u8; 4] = [80, 85, 90, 95];
pub const DEFAULT_SATURATION: f64 = 100.0;
/// Coverage of the date intervals reported with predictions.
pub const CONFIDENCE_LEVEL: f64 = 0.95;
// Two-sided standard normal quantile for `CONFIDENCE_LEVEL`.
const Z_95: f64 = 1.959_963_984_540_054;

/// Range of plausible crossing dates at `level` coverage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: NaiveDate,
    pub upper: NaiveDate,
    pub level: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastEntry {
    pub capability: String,
    /// Percent, `0..=100`.
    pub threshold: u8,
    pub predicted_date: NaiveDate,
    pub days_until: i64,
    #[serde(default)]
    pub category: String,
    #[serde(rename = "color", default)]
    pub color_tag: String,
    #[serde(default)]
    pub style: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<ConfidenceInterval>,
}

#[derive(Deserialize)]
struct RawInterval {
    lower: String,
    upper: String,
    #[serde(default)]
    level: Option<f64>,
}

#[derive(Deserialize)]
struct RawEntry {
    capability: String,
    threshold: f64,
    predicted_date: String,
    #[serde(default)]
    days_until: Option<f64>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    confidence_interval: Option<RawInterval>,
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    // Accepts bare dates and datetimes with a trailing time part.
    let head = raw.get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn entry_from_raw(raw: RawEntry) -> Result<ForecastEntry, String> {
    if !raw.threshold.is_finite() || !(0.0..=100.0).contains(&raw.threshold) {
        return Err(format!("threshold {} outside 0..=100", raw.threshold));
    }
    let predicted_date = parse_date(&raw.predicted_date)
        .ok_or_else(|| format!("bad predicted_date '{}'", raw.predicted_date))?;
    let days_until = match raw.days_until {
        Some(d) if d.is_finite() => d.trunc() as i64,
        Some(d) => return Err(format!("bad days_until {}", d)),
        None => 0,
    };
    let confidence_interval = match raw.confidence_interval {
        Some(ci) => {
            let lower = parse_date(&ci.lower)
                .ok_or_else(|| format!("bad interval lower bound '{}'", ci.lower))?;
            let upper = parse_date(&ci.upper)
                .ok_or_else(|| format!("bad interval upper bound '{}'", ci.upper))?;
            if upper < lower {
                return Err(format!("interval {} .. {} is reversed", lower, upper));
            }
            Some(ConfidenceInterval {
                lower,
                upper,
                level: ci.level.unwrap_or(CONFIDENCE_LEVEL),
            })
        }
        None => None,
    };
    Ok(ForecastEntry {
        capability: raw.capability,
        threshold: raw.threshold.round() as u8,
        predicted_date,
        days_until,
        category: raw.category.unwrap_or_default(),
        color_tag: raw.color.unwrap_or_default(),
        style: raw.style.unwrap_or_default(),
        confidence_interval,
    })
}

/// Reads `{"nodes": [...]}` or a bare list. Malformed entries are skipped
/// with a warning.
pub fn parse_forecast_entries(input: &[u8]) -> Result<Vec<ForecastEntry>, TerrainError> {
    let json: JsonValue =
        serde_json::from_slice(input).map_err(|e| TerrainError::DatasetParse(e.to_string()))?;
    let items = match json {
        JsonValue::Array(items) => items,
        JsonValue::Object(mut root) => match root.remove("nodes") {
            Some(JsonValue::Array(items)) => items,
            _ => {
                return Err(TerrainError::DatasetParse(
                    "forecast dataset needs a 'nodes' list".into(),
                ))
            }
        },
        _ => {
            return Err(TerrainError::DatasetParse(
                "forecast dataset must be a list or an object".into(),
            ))
        }
    };

    let mut entries = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawEntry>(item)
            .map_err(|e| e.to_string())
            .and_then(entry_from_raw);
        match parsed {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("skipping forecast entry #{}: {}", idx, e),
        }
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Radial layout

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RadialParams {
    pub base_radius: f64,
    pub radius_span: f64,
    pub base_height: f64,
    pub height_span: f64,
}

impl Default for RadialParams {
    fn default() -> Self {
        Self {
            base_radius: 30.0,
            radius_span: 20.0,
            base_height: 10.0,
            height_span: 20.0,
        }
    }
}

/// Position of the `index`-th of `total` markers. Higher thresholds sit
/// further out and higher up.
pub fn layout(entry: &ForecastEntry, index: usize, total: usize, params: &RadialParams) -> [f64; 3] {
    let total = total.max(1);
    let angle = index as f64 / total as f64 * TAU;
    let t = entry.threshold as f64 / 100.0;
    let radius = params.base_radius + t * params.radius_span;
    let height = params.base_height + t * params.height_span;
    [angle.cos() * radius, height, angle.sin() * radius]
}

pub fn color_for_tag(tag: &str) -> Rgb {
    Rgb::from_hex(match tag {
        "blue" => 0x4488ff,
        "purple" => 0xaa44ff,
        "red" => 0xff4444,
        "green" => 0x44ff88,
        _ => 0xffffff,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ForecastNode {
    pub capability: String,
    pub threshold: u8,
    pub predicted_date: NaiveDate,
    pub days_until: i64,
    pub position: [f64; 3],
    pub color: Rgb,
    /// Due within the next year.
    pub imminent: bool,
    pub past: bool,
    pub style: String,
    pub confidence_interval: Option<ConfidenceInterval>,
}

fn node(entry: &ForecastEntry, index: usize, total: usize, params: &RadialParams) -> ForecastNode {
    ForecastNode {
        capability: entry.capability.clone(),
        threshold: entry.threshold,
        predicted_date: entry.predicted_date,
        days_until: entry.days_until,
        position: layout(entry, index, total, params),
        color: color_for_tag(&entry.color_tag),
        imminent: entry.days_until > 0 && entry.days_until < 365,
        past: entry.days_until <= 0,
        style: entry.style.clone(),
        confidence_interval: entry.confidence_interval,
    }
}

pub fn layout_all(entries: &[ForecastEntry], params: &RadialParams) -> Vec<ForecastNode> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, e)| node(e, idx, entries.len(), params))
        .collect()
}

/// Entries whose capability name contains `filter` (case-insensitive).
///
/// Angles keep the unfiltered count as their denominator, so a filtered set
/// occupies only part of the circle.
pub fn layout_filtered(
    entries: &[ForecastEntry],
    filter: Option<&str>,
    params: &RadialParams,
) -> Vec<ForecastNode> {
    let needle = match filter {
        Some(f) if !f.is_empty() => f.to_lowercase(),
        _ => return layout_all(entries, params),
    };
    entries
        .iter()
        .filter(|e| e.capability.to_lowercase().contains(&needle))
        .enumerate()
        .map(|(idx, e)| node(e, idx, entries.len(), params))
        .collect()
}

// ---------------------------------------------------------------------------
// Logistic forecaster

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub date: NaiveDate,
    /// Benchmark score in percent.
    pub score: f64,
}

/// `L / (1 + exp(-k (t - t0)))`, `t` in days since `reference_date`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogisticModel {
    pub saturation: f64,
    pub k: f64,
    pub t0: f64,
    pub reference_date: NaiveDate,
}

impl LogisticModel {
    pub fn evaluate(&self, day: f64) -> f64 {
        self.saturation / (1.0 + (-self.k * (day - self.t0)).exp())
    }

    pub fn evaluate_date(&self, date: NaiveDate) -> f64 {
        self.evaluate((date - self.reference_date).num_days() as f64)
    }

    /// Fractional day at which the curve crosses `threshold`, if it ever does.
    pub fn crossing_day(&self, threshold: f64) -> Option<f64> {
        if !(threshold > 0.0 && threshold < self.saturation) {
            return None;
        }
        let t = self.t0 - (self.saturation / threshold - 1.0).ln() / self.k;
        t.is_finite().then_some(t)
    }

    pub fn date_at(&self, day: f64) -> Option<NaiveDate> {
        if !day.is_finite() || day.abs() > 1e7 {
            return None;
        }
        self.reference_date
            .checked_add_signed(Duration::days(day.floor() as i64))
    }
}

/// Standard errors of `(k, t0)` from the linearized least-squares covariance.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ParameterUncertainty {
    pub k_std: f64,
    pub t0_std: f64,
    pub covariance: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogisticFit {
    pub model: LogisticModel,
    pub r_squared: f64,
    pub observations: usize,
    /// `None` when the Jacobian at the fit is singular.
    pub uncertainty: Option<ParameterUncertainty>,
}

/// `s² (JᵀJ)⁻¹` with `s² = SSE / (n - 2)`, `J` the residual Jacobian in `(k, t0)`.
fn parameter_uncertainty(
    days: &[f64],
    saturation: f64,
    k: f64,
    t0: f64,
    sse: f64,
) -> Option<ParameterUncertainty> {
    let dof = days.len().checked_sub(2).filter(|&n| n > 0)? as f64;
    let (mut kk, mut kt, mut tt) = (0.0, 0.0, 0.0);
    for &t in days {
        let e = (-k * (t - t0)).exp();
        let denom = (1.0 + e).powi(2);
        let d_k = saturation * e * (t - t0) / denom;
        let d_t0 = -saturation * e * k / denom;
        kk += d_k * d_k;
        kt += d_k * d_t0;
        tt += d_t0 * d_t0;
    }
    let det = kk * tt - kt * kt;
    if !det.is_finite() || det <= 0.0 {
        return None;
    }
    let s2 = sse / dof;
    let var_k = s2 * tt / det;
    let var_t0 = s2 * kk / det;
    let uncertainty = ParameterUncertainty {
        k_std: var_k.sqrt(),
        t0_std: var_t0.sqrt(),
        covariance: -s2 * kt / det,
    };
    (uncertainty.k_std.is_finite() && uncertainty.t0_std.is_finite()).then_some(uncertainty)
}

const K_BOUNDS: (f64, f64) = (1e-4, 1.0);
const T0_LOWER: f64 = -1000.0;
const COARSE_GRID: (usize, usize) = (40, 60);
const REFINE_GRID: usize = 21;
const REFINE_ROUNDS: usize = 6;

fn linspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if count <= 1 {
        return vec![end];
    }
    let step = (end - start) / (count as f64 - 1.0);
    (0..count).map(|i| start + step * i as f64).collect()
}

fn logspace(start: f64, end: f64, count: usize) -> Vec<f64> {
    if start <= 0.0 || end <= 0.0 {
        return linspace(start, end, count);
    }
    linspace(start.ln(), end.ln(), count)
        .into_iter()
        .map(f64::exp)
        .collect()
}

fn refine_range(value: f64, lower: f64, upper: f64, count: usize, scale: f64) -> Vec<f64> {
    let span = (scale * value.abs()).max(0.05 * (upper - lower));
    let mut lo = (value - span).max(lower);
    let mut hi = (value + span).min(upper);
    if hi <= lo {
        lo = lower;
        hi = upper;
    }
    linspace(lo, hi, count.max(3))
}

fn logspace_refine(value: f64, lower: f64, upper: f64, count: usize, factor: f64) -> Vec<f64> {
    let lo = (value / factor).max(lower);
    let hi = (value * factor).min(upper);
    logspace(lo, hi, count.max(3))
}

fn squared_error(days: &[f64], scores: &[f64], saturation: f64, k: f64, t0: f64) -> f64 {
    days.iter()
        .zip(scores)
        .map(|(&t, &s)| {
            let pred = saturation / (1.0 + (-k * (t - t0)).exp());
            (s - pred).powi(2)
        })
        .sum()
}

/// Least-squares fit of `(k, t0)` with the saturation held fixed.
///
/// A coarse grid over `k ∈ [1e-4, 1]` (log-spaced) and
/// `t0 ∈ [-1000, 5 t_max]` is followed by rounds of shrinking local grids.
pub fn fit_logistic(observations: &[Observation], saturation: f64) -> Result<LogisticFit, TerrainError> {
    if observations.len() < 3 {
        return Err(TerrainError::InsufficientData);
    }
    if !saturation.is_finite() || saturation <= 0.0 {
        return Err(TerrainError::InvalidParameter(format!(
            "saturation must be positive, got {}",
            saturation
        )));
    }
    if observations.iter().any(|o| !o.score.is_finite()) {
        return Err(TerrainError::InvalidParameter(
            "observation scores must be finite".into(),
        ));
    }

    let reference_date = observations
        .iter()
        .map(|o| o.date)
        .min()
        .ok_or(TerrainError::InsufficientData)?;
    let days: Vec<f64> = observations
        .iter()
        .map(|o| (o.date - reference_date).num_days() as f64)
        .collect();
    let scores: Vec<f64> = observations.iter().map(|o| o.score).collect();
    let t_max = days.iter().copied().fold(0.0, f64::max);

    let (k_low, k_high) = K_BOUNDS;
    let (t_low, t_high) = (T0_LOWER, (5.0 * t_max).max(T0_LOWER + 1.0));

    let mut best_loss = f64::INFINITY;
    let mut best = None;
    for k in logspace(k_low, k_high, COARSE_GRID.0) {
        for t0 in linspace(t_low, t_high, COARSE_GRID.1) {
            let loss = squared_error(&days, &scores, saturation, k, t0);
            if loss < best_loss {
                best_loss = loss;
                best = Some((k, t0));
            }
        }
    }
    let (mut k_best, mut t0_best) = best.ok_or(TerrainError::InsufficientData)?;

    let (mut k_lo, mut k_hi, mut t_lo, mut t_hi) = (k_low, k_high, t_low, t_high);
    let mut factor = 2.0_f64;
    for _ in 0..REFINE_ROUNDS {
        let ks = logspace_refine(k_best, k_lo, k_hi, REFINE_GRID, factor);
        let ts = refine_range(t0_best, t_lo, t_hi, REFINE_GRID, 0.3);
        for &k in &ks {
            for &t0 in &ts {
                let loss = squared_error(&days, &scores, saturation, k, t0);
                if loss < best_loss {
                    best_loss = loss;
                    k_best = k;
                    t0_best = t0;
                }
            }
        }
        k_lo = ks[0];
        k_hi = ks[ks.len() - 1];
        t_lo = ts[0];
        t_hi = ts[ts.len() - 1];
        factor = factor.sqrt();
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let ss_tot: f64 = scores.iter().map(|s| (s - mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 {
        1.0 - best_loss / ss_tot
    } else {
        0.0
    };
    debug!(
        "logistic fit: k {:.5}, t0 {:.1}, r2 {:.4} over {} observations",
        k_best,
        t0_best,
        r_squared,
        observations.len()
    );

    Ok(LogisticFit {
        model: LogisticModel {
            saturation,
            k: k_best,
            t0: t0_best,
            reference_date,
        },
        r_squared,
        observations: observations.len(),
        uncertainty: parameter_uncertainty(&days, saturation, k_best, t0_best, best_loss),
    })
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThresholdPrediction {
    AlreadyAchieved { date: NaiveDate },
    Unreachable,
    Predicted {
        date: NaiveDate,
        days_until: i64,
        confidence_interval: Option<ConfidenceInterval>,
    },
}

/// Delta-method interval around the crossing day `t = t0 - ln(L/thr - 1) / k`.
fn crossing_interval(fit: &LogisticFit, threshold: f64, day: f64) -> Option<ConfidenceInterval> {
    let u = fit.uncertainty?;
    let model = &fit.model;
    let c = (model.saturation / threshold - 1.0).ln();
    let d_k = c / (model.k * model.k);
    let variance = u.t0_std.powi(2) + 2.0 * d_k * u.covariance + d_k.powi(2) * u.k_std.powi(2);
    if !variance.is_finite() || variance < 0.0 {
        return None;
    }
    let half = Z_95 * variance.sqrt();
    Some(ConfidenceInterval {
        lower: model.date_at(day - half)?,
        upper: model.date_at(day + half)?,
        level: CONFIDENCE_LEVEL,
    })
}

/// When the fitted curve reaches `threshold` percent.
///
/// An observation at or above the threshold wins over the model: the
/// earliest such date is reported as already achieved.
pub fn predict_threshold(
    fit: &LogisticFit,
    observations: &[Observation],
    threshold: f64,
    today: NaiveDate,
) -> ThresholdPrediction {
    if let Some(first) = observations
        .iter()
        .filter(|o| o.score >= threshold)
        .map(|o| o.date)
        .min()
    {
        return ThresholdPrediction::AlreadyAchieved { date: first };
    }
    let model = &fit.model;
    let Some(day) = model.crossing_day(threshold) else {
        return ThresholdPrediction::Unreachable;
    };
    match model.date_at(day) {
        Some(date) => ThresholdPrediction::Predicted {
            date,
            days_until: (date - today).num_days(),
            confidence_interval: crossing_interval(fit, threshold, day),
        },
        None => ThresholdPrediction::Unreachable,
    }
}

/// Forecast rows for each threshold still ahead of the observed history.
pub fn forecast_entries(
    capability: &str,
    category: &str,
    fit: &LogisticFit,
    observations: &[Observation],
    today: NaiveDate,
    thresholds: &[u8],
) -> Vec<ForecastEntry> {
    thresholds
        .iter()
        .filter_map(|&threshold| {
            match predict_threshold(fit, observations, threshold as f64, today) {
                ThresholdPrediction::Predicted {
                    date,
                    days_until,
                    confidence_interval,
                } => Some(ForecastEntry {
                    capability: capability.to_string(),
                    threshold,
                    predicted_date: date,
                    days_until,
                    category: category.to_string(),
                    color_tag: if threshold < 90 { "blue" } else { "purple" }.to_string(),
                    style: "translucent".to_string(),
                    confidence_interval,
                }),
                _ => None,
            }
        })
        .collect()
}

/// Fitted values at the observed days followed by weekly steps past the
/// last observation.
pub fn forecast_curve(
    fit: &LogisticFit,
    observations: &[Observation],
    days_ahead: u32,
) -> Vec<(NaiveDate, f64)> {
    let model = &fit.model;
    let mut out: Vec<(NaiveDate, f64)> = observations
        .iter()
        .map(|o| (o.date, model.evaluate_date(o.date)))
        .collect();
    let last = match observations.iter().map(|o| o.date).max() {
        Some(d) => d,
        None => return out,
    };
    let mut step = 0i64;
    while step < days_ahead as i64 {
        if let Some(date) = last.checked_add_signed(Duration::days(step)) {
            out.push((date, model.evaluate_date(date)));
        }
        step += 7;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn history() -> Vec<Observation> {
        [
            (d(2022, 1, 1), 45.0),
            (d(2022, 6, 1), 52.0),
            (d(2023, 1, 1), 61.0),
            (d(2023, 6, 1), 68.0),
            (d(2024, 1, 1), 75.0),
            (d(2024, 6, 1), 82.0),
        ]
        .into_iter()
        .map(|(date, score)| Observation { date, score })
        .collect()
    }

    fn entry(capability: &str, threshold: u8) -> ForecastEntry {
        ForecastEntry {
            capability: capability.into(),
            threshold,
            predicted_date: d(2026, 1, 1),
            days_until: 200,
            category: String::new(),
            color_tag: "blue".into(),
            style: "translucent".into(),
            confidence_interval: None,
        }
    }

    #[test]
    fn layout_matches_radial_formula() {
        let params = RadialParams::default();
        let p = layout(&entry("x", 90), 0, 4, &params);
        assert_relative_eq!(p[0], 48.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 28.0, epsilon = 1e-12);
        assert_relative_eq!(p[2], 0.0, epsilon = 1e-12);

        let q = layout(&entry("x", 50), 1, 4, &params);
        assert_relative_eq!(q[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(q[2], 40.0, epsilon = 1e-12);
        // zero total behaves like one
        assert_eq!(layout(&entry("x", 0), 0, 0, &params), [30.0, 10.0, 0.0]);
    }

    #[test]
    fn filtered_layout_keeps_full_denominator() {
        let entries = vec![
            entry("code_generation", 80),
            entry("math_reasoning", 80),
            entry("Code_Review", 80),
            entry("vision", 80),
        ];
        let params = RadialParams::default();
        let nodes = layout_filtered(&entries, Some("code"), &params);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].capability, "Code_Review");
        // second filtered node sits a quarter turn round, not half
        assert_relative_eq!(nodes[1].position[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(nodes[1].position[2], 46.0, epsilon = 1e-9);
        assert_eq!(layout_filtered(&entries, None, &params).len(), 4);
    }

    #[test]
    fn node_flags_and_colors() {
        let mut e = entry("x", 85);
        let n = layout_all(std::slice::from_ref(&e), &RadialParams::default());
        assert!(n[0].imminent);
        assert!(!n[0].past);
        assert_eq!(n[0].color.to_u8(), [0x44, 0x88, 0xff]);

        e.days_until = 0;
        e.color_tag = "orange".into();
        let n = layout_all(std::slice::from_ref(&e), &RadialParams::default());
        assert!(!n[0].imminent);
        assert!(n[0].past);
        assert_eq!(n[0].color, Rgb::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn parses_forecast_file() {
        let json = br#"{"nodes": [
            {"capability": "code_generation", "threshold": 90, "predicted_date": "2025-07-14",
             "days_until": 408.7, "color": "purple", "style": "translucent"},
            {"capability": "bad", "threshold": 140, "predicted_date": "2025-01-01"},
            {"capability": "bad_date", "threshold": 80, "predicted_date": "soon"},
            {"capability": "dt", "threshold": 85.4, "predicted_date": "2025-02-03T00:00:00"}
        ]}"#;
        let entries = parse_forecast_entries(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].days_until, 408);
        assert_eq!(entries[0].color_tag, "purple");
        assert_eq!(entries[1].threshold, 85);
        assert_eq!(entries[1].predicted_date, d(2025, 2, 3));
        assert!(parse_forecast_entries(b"42").is_err());
    }

    #[test]
    fn logistic_fit_tracks_history() {
        let obs = history();
        let fit = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        assert!(fit.r_squared > 0.95, "r2 {}", fit.r_squared);
        assert!(fit.model.k >= 1e-4 && fit.model.k <= 1.0);
        assert_eq!(fit.model.reference_date, d(2022, 1, 1));
        let last = fit.model.evaluate_date(d(2024, 6, 1));
        assert!((last - 82.0).abs() < 3.0, "fitted {}", last);
    }

    #[test]
    fn predicts_future_thresholds() {
        let obs = history();
        let fit = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        let today = d(2024, 6, 1);

        assert_eq!(
            predict_threshold(&fit, &obs, 80.0, today),
            ThresholdPrediction::AlreadyAchieved {
                date: d(2024, 6, 1)
            }
        );
        match predict_threshold(&fit, &obs, 90.0, today) {
            ThresholdPrediction::Predicted {
                date, days_until, ..
            } => {
                assert!(date > d(2025, 1, 1) && date < d(2026, 6, 30), "{}", date);
                assert_eq!(days_until, (date - today).num_days());
                assert!(days_until > 0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            predict_threshold(&fit, &obs, 100.0, today),
            ThresholdPrediction::Unreachable
        );
    }

    #[test]
    fn exports_entries_for_pending_thresholds() {
        let obs = history();
        let fit = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        let rows = forecast_entries(
            "code_generation",
            "coding",
            &fit,
            &obs,
            d(2024, 6, 1),
            &DEFAULT_THRESHOLDS,
        );
        let thresholds: Vec<u8> = rows.iter().map(|r| r.threshold).collect();
        assert_eq!(thresholds, vec![85, 90, 95]);
        assert_eq!(rows[0].color_tag, "blue");
        assert_eq!(rows[1].color_tag, "purple");
        assert!(rows.windows(2).all(|w| w[0].predicted_date < w[1].predicted_date));
        assert!(rows.iter().all(|r| r.style == "translucent"));
    }

    #[test]
    fn predictions_carry_a_date_interval() {
        let obs = history();
        let fit = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        let u = fit.uncertainty.expect("well-conditioned fit");
        assert!(u.k_std > 0.0 && u.t0_std > 0.0);

        let today = d(2024, 6, 1);
        for threshold in [85.0, 90.0, 95.0] {
            match predict_threshold(&fit, &obs, threshold, today) {
                ThresholdPrediction::Predicted {
                    date,
                    confidence_interval: Some(ci),
                    ..
                } => {
                    assert!(ci.lower <= date && date <= ci.upper, "{} not in {:?}", date, ci);
                    assert!(ci.lower < ci.upper);
                    assert_eq!(ci.level, CONFIDENCE_LEVEL);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        let rows = forecast_entries("x", "", &fit, &obs, today, &DEFAULT_THRESHOLDS);
        assert!(rows.iter().all(|r| r.confidence_interval.is_some()));
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert!(json["confidence_interval"]["lower"].is_string());
        assert_eq!(json["confidence_interval"]["level"], 0.95);
    }

    #[test]
    fn intervals_are_repeatable() {
        let obs = history();
        let a = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        let b = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        let today = d(2024, 6, 1);
        assert_eq!(
            predict_threshold(&a, &obs, 90.0, today),
            predict_threshold(&b, &obs, 90.0, today)
        );
    }

    #[test]
    fn singular_fit_has_no_interval() {
        let mut fit = fit_logistic(&history(), DEFAULT_SATURATION).unwrap();
        fit.uncertainty = None;
        match predict_threshold(&fit, &history(), 90.0, d(2024, 6, 1)) {
            ThresholdPrediction::Predicted {
                confidence_interval, ..
            } => assert!(confidence_interval.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parses_interval_from_forecast_file() {
        let json = br#"[
            {"capability": "a", "threshold": 90, "predicted_date": "2026-03-01",
             "confidence_interval": {"lower": "2025-11-02", "upper": "2026-07-20", "level": 0.95}},
            {"capability": "b", "threshold": 90, "predicted_date": "2026-03-01",
             "confidence_interval": {"lower": "2026-07-20", "upper": "2025-11-02"}}
        ]"#;
        let entries = parse_forecast_entries(json).unwrap();
        assert_eq!(entries.len(), 1);
        let ci = entries[0].confidence_interval.unwrap();
        assert_eq!(ci.lower, d(2025, 11, 2));
        assert_eq!(ci.upper, d(2026, 7, 20));
        let nodes = layout_all(&entries, &RadialParams::default());
        assert_eq!(nodes[0].confidence_interval, Some(ci));
    }

    #[test]
    fn last_index_closes_the_circle() {
        let params = RadialParams::default();
        let total = 7;
        let p = layout(&entry("x", 60), total - 1, total, &params);
        let angle = (total - 1) as f64 / total as f64 * TAU;
        let radius = 30.0 + 0.6 * 20.0;
        assert_relative_eq!(p[0], angle.cos() * radius, epsilon = 1e-9);
        assert_relative_eq!(p[1], 10.0 + 0.6 * 20.0, epsilon = 1e-12);
        assert_relative_eq!(p[2], angle.sin() * radius, epsilon = 1e-9);
        assert_relative_eq!(p[2].atan2(p[0]).rem_euclid(TAU), angle, epsilon = 1e-9);
    }

    #[test]
    fn radius_grows_with_threshold() {
        let params = RadialParams::default();
        let radius = |threshold: u8| {
            let p = layout(&entry("x", threshold), 3, 5, &params);
            p[0].hypot(p[2])
        };
        let mut last = radius(0);
        assert_relative_eq!(last, 30.0, epsilon = 1e-9);
        for threshold in 1..=100u8 {
            let r = radius(threshold);
            assert!(r > last, "radius {} at {} not above {}", r, threshold, last);
            last = r;
        }
        assert_relative_eq!(last, 50.0, epsilon = 1e-9);
    }

    #[test]
    fn fit_needs_three_points() {
        let obs = &history()[..2];
        assert!(matches!(
            fit_logistic(obs, DEFAULT_SATURATION),
            Err(TerrainError::InsufficientData)
        ));
    }

    #[test]
    fn curve_extends_weekly() {
        let obs = history();
        let fit = fit_logistic(&obs, DEFAULT_SATURATION).unwrap();
        let curve = forecast_curve(&fit, &obs, 28);
        assert_eq!(curve.len(), obs.len() + 4);
        assert_eq!(curve[obs.len() + 1].0, d(2024, 6, 8));
        assert!(curve.windows(2).skip(obs.len()).all(|w| w[1].1 >= w[0].1));
    }
}
