//! Height bands and the terrain color palette.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::interpolate::{HeightField, Kernel};
use crate::TerrainError;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// `0xRRGGBB` -> components in `[0, 1]`.
    pub fn from_hex(hex: u32) -> Self {
        let channel = |shift: u32| ((hex >> shift) & 0xff) as f64 / 255.0;
        Self::new(channel(16), channel(8), channel(0))
    }

    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        Rgb::new(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }

    /// Multiply every channel by `factor`, clamped to `[0, 1]`.
    pub fn scale(self, factor: f64) -> Rgb {
        let c = |v: f64| (v * factor).clamp(0.0, 1.0);
        Rgb::new(c(self.r), c(self.g), c(self.b))
    }

    pub fn to_u8(self) -> [u8; 3] {
        let c = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [c(self.r), c(self.g), c(self.b)]
    }

    pub fn to_hex_string(self) -> String {
        let [r, g, b] = self.to_u8();
        format!("#{:02x}{:02x}{:02x}", r, g, b)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    DeepSinkhole,
    Sinkhole,
    Lowland,
    Grassland,
    Highland,
    Mountain,
    Peak,
}

impl Band {
    pub const ALL: [Band; 7] = [
        Band::DeepSinkhole,
        Band::Sinkhole,
        Band::Lowland,
        Band::Grassland,
        Band::Highland,
        Band::Mountain,
        Band::Peak,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Band::DeepSinkhole => "deep_sinkhole",
            Band::Sinkhole => "sinkhole",
            Band::Lowland => "lowland",
            Band::Grassland => "grassland",
            Band::Highland => "highland",
            Band::Mountain => "mountain",
            Band::Peak => "peak",
        }
    }

    pub fn color(self) -> Rgb {
        Rgb::from_hex(match self {
            Band::DeepSinkhole => 0x1a0f0f,
            Band::Sinkhole => 0x471515,
            Band::Lowland => 0x234d1f,
            Band::Grassland => 0x526f35,
            Band::Highland => 0x8b7355,
            Band::Mountain => 0x9c917f,
            Band::Peak => 0xe8e8e8,
        })
    }
}

/// Flat color of nodes no sample reaches; they carry no band.
pub const BASE_COLOR: u32 = 0x1a1a2e;

// Normalized tops of the lowland, grassland, highland and mountain bands.
pub const LOWLAND_TOP: f64 = 0.30;
pub const GRASSLAND_TOP: f64 = 0.50;
pub const HIGHLAND_TOP: f64 = 0.70;
pub const PEAK_FLOOR: f64 = 0.85;
/// Highest normalized top the sinkhole band is drawn with. Larger sinkhole
/// thresholds still flag samples and build rings at their own value.
pub const SINKHOLE_BAND_MAX: f64 = 0.9 * LOWLAND_TOP;

/// Six ascending world-unit cutoffs; band `k` covers `[cutoffs[k-1], cutoffs[k])`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BandThresholds {
    cutoffs: [f64; 6],
}

impl BandThresholds {
    pub fn new(cutoffs: [f64; 6]) -> Result<Self, TerrainError> {
        if cutoffs.iter().any(|c| !c.is_finite()) {
            return Err(TerrainError::InvalidParameter(
                "band cutoffs must be finite".into(),
            ));
        }
        if cutoffs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TerrainError::InvalidParameter(format!(
                "band cutoffs must be strictly ascending, got {:?}",
                cutoffs
            )));
        }
        Ok(Self { cutoffs })
    }

    /// Cutoffs for a terrain scaled by `height_scale`, with the sinkhole band
    /// ending at `sinkhole_threshold` (normalized, capped at
    /// [`SINKHOLE_BAND_MAX`]).
    pub fn from_levels(height_scale: f64, sinkhole_threshold: f64) -> Result<Self, TerrainError> {
        Self::new([
            0.0,
            sinkhole_threshold.min(SINKHOLE_BAND_MAX) * height_scale,
            LOWLAND_TOP * height_scale,
            GRASSLAND_TOP * height_scale,
            HIGHLAND_TOP * height_scale,
            PEAK_FLOOR * height_scale,
        ])
    }

    pub fn cutoffs(&self) -> &[f64; 6] {
        &self.cutoffs
    }

    /// NaN compares false against every cutoff and lands in the lowest band.
    pub fn band(&self, height: f64) -> Band {
        let above = self.cutoffs.iter().filter(|&&c| height >= c).count();
        Band::ALL[above]
    }
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            cutoffs: [0.0, 3.6, 9.0, 15.0, 21.0, 25.5],
        }
    }
}

pub fn classify(height: f64, thresholds: &BandThresholds) -> (Band, Rgb) {
    let band = thresholds.band(height);
    (band, band.color())
}

/// Band color bled toward the adjacent bands by boundary distance.
///
/// The own band weighs 1; each neighbor weighs `kernel(d / span)`, `d` being
/// the world distance to the boundary shared with that neighbor.
pub fn blended_color(height: f64, thresholds: &BandThresholds, kernel: Kernel, span: f64) -> Rgb {
    let (band, color) = classify(height, thresholds);
    if !height.is_finite() || span.is_nan() || span <= 0.0 {
        return color;
    }
    let idx = band.index();
    let cutoffs = thresholds.cutoffs();

    let mut total = 1.0;
    let mut mixed = color;
    let mut add = |neighbor: Band, distance: f64| {
        let w = kernel.weight(distance / span);
        let c = neighbor.color();
        mixed.r += c.r * w;
        mixed.g += c.g * w;
        mixed.b += c.b * w;
        total += w;
    };
    if idx > 0 {
        add(Band::ALL[idx - 1], height - cutoffs[idx - 1]);
    }
    if idx < Band::ALL.len() - 1 {
        add(Band::ALL[idx + 1], cutoffs[idx] - height);
    }
    Rgb::new(mixed.r / total, mixed.g / total, mixed.b / total)
}

/// Per-node bands and display colors, indexed `[j, i]` like [`HeightField`].
///
/// Zero-influence nodes have no band and are painted [`BASE_COLOR`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColorField {
    pub bands: Array2<Option<Band>>,
    pub colors: Array2<Rgb>,
}

impl ColorField {
    pub fn band(&self, i: usize, j: usize) -> Option<Band> {
        self.bands[[j, i]]
    }

    pub fn color(&self, i: usize, j: usize) -> Rgb {
        self.colors[[j, i]]
    }
}

pub fn color_field(
    field: &HeightField,
    thresholds: &BandThresholds,
    kernel: Kernel,
    span: f64,
) -> ColorField {
    let shape = field.heights.dim();
    let covered = |i: usize, j: usize| field.influence(i, j) > 0.0;
    let bands = Array2::from_shape_fn(shape, |(j, i)| {
        covered(i, j).then(|| thresholds.band(field.height(i, j)))
    });
    let colors = Array2::from_shape_fn(shape, |(j, i)| {
        if covered(i, j) {
            blended_color(field.height(i, j), thresholds, kernel, span)
        } else {
            Rgb::from_hex(BASE_COLOR)
        }
    });
    ColorField { bands, colors }
}
