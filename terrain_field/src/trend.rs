//! Per-capability trend lines across years and improvement velocity.

use std::borrow::Borrow;

use serde::{Deserialize, Serialize};

use crate::classify::Rgb;
use crate::dataset::CapabilitySample;
use crate::overview::OverviewFrame;
use crate::temporal::resolve_level;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrendCurve {
    pub key: String,
    pub points: Vec<[f64; 3]>,
}

/// One point per year, spread along x around the sample's overview position.
pub fn trend_curve(sample: &CapabilitySample, years: &[i32], frame: &OverviewFrame) -> TrendCurve {
    let points = years
        .iter()
        .enumerate()
        .map(|(idx, &year)| {
            let [x, y, z] = frame.world_point(sample.position, resolve_level(sample, year));
            [
                x + frame.year_offset(idx, years.len()),
                y,
                z + frame.marker_lift,
            ]
        })
        .collect();
    TrendCurve {
        key: sample.key.clone(),
        points,
    }
}

pub fn trend_curves<S: Borrow<CapabilitySample>>(
    samples: &[S],
    years: &[i32],
    frame: &OverviewFrame,
) -> Vec<TrendCurve> {
    samples
        .iter()
        .map(|s| trend_curve(s.borrow(), years, frame))
        .collect()
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Accelerating,
    Decelerating,
    #[default]
    Stable,
}

/// Percent-per-year improvement between consecutive recorded years.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Velocity {
    pub velocity: f64,
    pub acceleration: f64,
    pub recent_velocity: f64,
    pub trend: TrendLabel,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn velocity(sample: &CapabilitySample) -> Velocity {
    let history: Vec<(i32, f64)> = sample.heights.iter().map(|(&y, &l)| (y, l)).collect();
    if history.len() < 2 {
        return Velocity::default();
    }

    let rates: Vec<f64> = history
        .windows(2)
        .map(|w| {
            let ((y0, s0), (y1, s1)) = (w[0], w[1]);
            if s0 > 0.0 {
                (s1 - s0) / s0 * 100.0 / (y1 - y0) as f64
            } else {
                0.0
            }
        })
        .collect();

    let mean = rates.iter().sum::<f64>() / rates.len() as f64;
    let recent = rates[rates.len() - 1];
    let (acceleration, trend) = if rates.len() >= 2 {
        let acc = recent - rates[rates.len() - 2];
        let label = if acc > 0.5 {
            TrendLabel::Accelerating
        } else if acc < -0.5 {
            TrendLabel::Decelerating
        } else {
            TrendLabel::Stable
        };
        (acc, label)
    } else {
        (0.0, TrendLabel::Stable)
    };

    Velocity {
        velocity: round2(mean),
        acceleration: round2(acceleration),
        recent_velocity: round2(recent),
        trend,
    }
}

/// Darken slow or regressing capabilities; factor `clamp(1 + v/50, 0.5, 1)`.
pub fn velocity_tint(color: Rgb, velocity: f64) -> Rgb {
    if velocity == 0.0 || !velocity.is_finite() {
        return color;
    }
    color.scale((1.0 + velocity / 50.0).clamp(0.5, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Position;
    use approx::assert_relative_eq;

    fn sample() -> CapabilitySample {
        CapabilitySample::new("math", "reasoning", Position::new(0.5, 0.5).unwrap())
    }

    #[test]
    fn curve_has_one_point_per_year() {
        let s = sample().with_height(2020, 0.5);
        let frame = OverviewFrame::default();
        let curve = trend_curve(&s, &[2019, 2020, 2021], &frame);
        assert_eq!(curve.points.len(), 3);
        assert_eq!(curve.points[0][0], -12.0);
        assert_eq!(curve.points[2][0], 12.0);
        // missing years resolve to the mean, which is the only recorded level
        for p in &curve.points {
            assert_relative_eq!(p[1], 100.0, epsilon = 1e-9);
            assert_eq!(p[2], 6.0);
        }
    }

    #[test]
    fn velocity_matches_percent_change() {
        let s = sample()
            .with_height(2020, 0.2)
            .with_height(2021, 0.3)
            .with_height(2023, 0.6);
        let v = velocity(&s);
        // 50%/yr, then 100% over two years
        assert_relative_eq!(v.velocity, 50.0, epsilon = 1e-9);
        assert_relative_eq!(v.recent_velocity, 50.0, epsilon = 1e-9);
        assert_relative_eq!(v.acceleration, 0.0, epsilon = 1e-9);
        assert_eq!(v.trend, TrendLabel::Stable);
    }

    #[test]
    fn acceleration_labels() {
        let up = sample()
            .with_height(2020, 0.1)
            .with_height(2021, 0.11)
            .with_height(2022, 0.2);
        assert_eq!(velocity(&up).trend, TrendLabel::Accelerating);

        let down = sample()
            .with_height(2020, 0.1)
            .with_height(2021, 0.2)
            .with_height(2022, 0.21);
        assert_eq!(velocity(&down).trend, TrendLabel::Decelerating);
    }

    #[test]
    fn short_or_zero_history_is_stable() {
        assert_eq!(velocity(&sample().with_height(2024, 0.4)), Velocity::default());
        let from_zero = sample().with_height(2020, 0.0).with_height(2021, 0.5);
        assert_eq!(velocity(&from_zero).velocity, 0.0);
    }

    #[test]
    fn tint_darkens_slow_capabilities() {
        let base = Rgb::new(0.8, 0.6, 0.4);
        assert_eq!(velocity_tint(base, 0.0), base);
        assert_eq!(velocity_tint(base, 20.0), base);
        let dark = velocity_tint(base, -50.0);
        assert_relative_eq!(dark.r, 0.4, epsilon = 1e-12);
        let mid = velocity_tint(base, -10.0);
        assert_relative_eq!(mid.g, 0.48, epsilon = 1e-12);
    }
}
