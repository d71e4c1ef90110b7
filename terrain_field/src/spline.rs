//! Catmull-Rom curves through 3-D control points.

use serde::{Deserialize, Serialize};

/// Knot parametrization.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CurveKind {
    /// Uniform knots, tension 0.5.
    Uniform,
    /// Knot spacing `|p_i - p_{i-1}|^0.5`; no cusps or self-intersections
    /// within a segment.
    #[default]
    Centripetal,
    /// Knot spacing `|p_i - p_{i-1}|`.
    Chordal,
}

#[derive(Clone, Copy, Debug)]
struct Cubic {
    c0: f64,
    c1: f64,
    c2: f64,
    c3: f64,
}

impl Cubic {
    fn hermite(x0: f64, x1: f64, t0: f64, t1: f64) -> Self {
        Self {
            c0: x0,
            c1: t0,
            c2: -3.0 * x0 + 3.0 * x1 - 2.0 * t0 - t1,
            c3: 2.0 * x0 - 2.0 * x1 + t0 + t1,
        }
    }

    fn uniform(x0: f64, x1: f64, x2: f64, x3: f64, tension: f64) -> Self {
        Self::hermite(x1, x2, tension * (x2 - x0), tension * (x3 - x1))
    }

    #[allow(clippy::too_many_arguments)]
    fn nonuniform(x0: f64, x1: f64, x2: f64, x3: f64, dt0: f64, dt1: f64, dt2: f64) -> Self {
        let t1 = ((x1 - x0) / dt0 - (x2 - x0) / (dt0 + dt1) + (x2 - x1) / dt1) * dt1;
        let t2 = ((x2 - x1) / dt1 - (x3 - x1) / (dt1 + dt2) + (x3 - x2) / dt2) * dt1;
        Self::hermite(x1, x2, t1, t2)
    }

    fn eval(&self, t: f64) -> f64 {
        let t2 = t * t;
        self.c0 + self.c1 * t + self.c2 * t2 + self.c3 * t2 * t
    }
}

fn dist_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    (0..3).map(|k| (a[k] - b[k]).powi(2)).sum()
}

fn extrapolate(edge: [f64; 3], inner: [f64; 3]) -> [f64; 3] {
    [
        2.0 * edge[0] - inner[0],
        2.0 * edge[1] - inner[1],
        2.0 * edge[2] - inner[2],
    ]
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CatmullRom {
    pub points: Vec<[f64; 3]>,
    pub closed: bool,
    pub kind: CurveKind,
}

impl CatmullRom {
    pub fn new(points: Vec<[f64; 3]>, closed: bool, kind: CurveKind) -> Self {
        Self {
            points,
            closed,
            kind,
        }
    }

    /// Point at parameter `t ∈ [0, 1]` along the whole curve.
    ///
    /// Returns `None` for an empty curve. A single control point is returned
    /// as-is.
    pub fn point_at(&self, t: f64) -> Option<[f64; 3]> {
        let pts = &self.points;
        let l = pts.len();
        match l {
            0 => return None,
            1 => return Some(pts[0]),
            _ => {}
        }

        let span = if self.closed { l } else { l - 1 } as f64;
        let p = span * t.clamp(0.0, 1.0);
        let mut seg = p.floor() as usize;
        let mut weight = p - seg as f64;
        if !self.closed && seg >= l - 1 {
            seg = l - 2;
            weight = 1.0;
        }

        let at = |idx: usize| pts[idx % l];
        let p1 = at(seg);
        let p2 = at(seg + 1);
        let p0 = if self.closed || seg > 0 {
            at(seg + l - 1)
        } else {
            extrapolate(pts[0], pts[1])
        };
        let p3 = if self.closed || seg + 2 < l {
            at(seg + 2)
        } else {
            extrapolate(pts[l - 1], pts[l - 2])
        };

        let exponent = match self.kind {
            CurveKind::Uniform => None,
            CurveKind::Centripetal => Some(0.25),
            CurveKind::Chordal => Some(0.5),
        };

        let mut out = [0.0; 3];
        match exponent {
            None => {
                for k in 0..3 {
                    out[k] = Cubic::uniform(p0[k], p1[k], p2[k], p3[k], 0.5).eval(weight);
                }
            }
            Some(pow) => {
                let mut dt0 = dist_sq(p0, p1).powf(pow);
                let mut dt1 = dist_sq(p1, p2).powf(pow);
                let mut dt2 = dist_sq(p2, p3).powf(pow);
                // coincident control points
                if dt1 < 1e-4 {
                    dt1 = 1.0;
                }
                if dt0 < 1e-4 {
                    dt0 = dt1;
                }
                if dt2 < 1e-4 {
                    dt2 = dt1;
                }
                for k in 0..3 {
                    out[k] = Cubic::nonuniform(p0[k], p1[k], p2[k], p3[k], dt0, dt1, dt2)
                        .eval(weight);
                }
            }
        }
        Some(out)
    }

    /// `divisions + 1` evenly spaced parameter samples, endpoints included.
    /// For a closed curve the last point coincides with the first.
    pub fn sample(&self, divisions: usize) -> Vec<[f64; 3]> {
        let divisions = divisions.max(1);
        (0..=divisions)
            .filter_map(|d| self.point_at(d as f64 / divisions as f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square() -> Vec<[f64; 3]> {
        vec![
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0],
            [-1.0, 0.0, 0.0],
            [0.0, 0.0, -1.0],
        ]
    }

    #[test]
    fn passes_through_control_points() {
        for kind in [CurveKind::Uniform, CurveKind::Centripetal, CurveKind::Chordal] {
            let curve = CatmullRom::new(square(), true, kind);
            for (idx, expected) in square().iter().enumerate() {
                let got = curve.point_at(idx as f64 / 4.0).unwrap();
                for k in 0..3 {
                    assert_relative_eq!(got[k], expected[k], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn closed_sample_wraps_to_start() {
        let curve = CatmullRom::new(square(), true, CurveKind::Centripetal);
        let pts = curve.sample(100);
        assert_eq!(pts.len(), 101);
        let (first, last) = (pts[0], pts[100]);
        for k in 0..3 {
            assert_relative_eq!(first[k], last[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn open_curve_ends_at_last_point() {
        let curve = CatmullRom::new(square(), false, CurveKind::Centripetal);
        let end = curve.point_at(1.0).unwrap();
        assert_relative_eq!(end[2], -1.0, epsilon = 1e-12);
        assert_relative_eq!(end[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn coincident_points_stay_finite() {
        let pts = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let curve = CatmullRom::new(pts, true, CurveKind::Centripetal);
        assert!(curve
            .sample(30)
            .iter()
            .all(|p| p.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn degenerate_inputs() {
        assert!(CatmullRom::new(vec![], true, CurveKind::Uniform)
            .point_at(0.5)
            .is_none());
        let single = CatmullRom::new(vec![[2.0, 3.0, 4.0]], true, CurveKind::Uniform);
        assert_eq!(single.sample(4), vec![[2.0, 3.0, 4.0]; 5]);
    }
}
