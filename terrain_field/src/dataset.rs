//! Capability samples and the JSON dataset they are loaded from.
//!
//! The dataset is a mapping from capability key to
//! `{ category, x, y, heights: {"2020": 0.4, ...}, top_models? }`, either at
//! the top level or nested under `"all"`. Entries are kept in key order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::TerrainError;

/// Normalized layout position inside the unit square.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// Returns `None` unless both coordinates are finite and within `[0, 1]`.
    pub fn new(x: f64, y: f64) -> Option<Self> {
        let inside = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if inside(x) && inside(y) {
            Some(Self { x, y })
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CapabilitySample {
    pub key: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub position: Position,
    pub heights: BTreeMap<i32, f64>,
    pub top_models: Option<BTreeSet<String>>,
}

impl CapabilitySample {
    pub fn new(key: impl Into<String>, category: impl Into<String>, position: Position) -> Self {
        Self {
            key: key.into(),
            name: None,
            description: None,
            category: category.into(),
            position,
            heights: BTreeMap::new(),
            top_models: None,
        }
    }

    pub fn with_height(mut self, year: i32, level: f64) -> Self {
        self.heights.insert(year, level);
        self
    }

    pub fn with_top_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.top_models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Label for overlays: the explicit name, or the key in title case.
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => title_case(&self.key),
        }
    }
}

/// `code_generation` -> `Code Generation`.
pub fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// An immutable collection of capability samples.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub samples: Vec<CapabilitySample>,
    /// Keys of entries dropped while loading (malformed entry or invalid position).
    pub skipped: Vec<String>,
}

#[derive(Deserialize)]
struct RawCapability {
    name: Option<String>,
    description: Option<String>,
    category: Option<String>,
    x: Option<f64>,
    y: Option<f64>,
    #[serde(default)]
    heights: Option<BTreeMap<String, JsonValue>>,
    #[serde(default)]
    top_models: JsonValue,
}

impl Dataset {
    pub fn from_samples(samples: Vec<CapabilitySample>) -> Self {
        Self {
            samples,
            skipped: Vec::new(),
        }
    }

    pub fn parse_json(input: &[u8]) -> Result<Self, TerrainError> {
        let json: JsonValue =
            serde_json::from_slice(input).map_err(|e| TerrainError::DatasetParse(e.to_string()))?;
        Self::from_value(json)
    }

    pub fn from_value(json: JsonValue) -> Result<Self, TerrainError> {
        let mut root = match json {
            JsonValue::Object(map) => map,
            _ => {
                return Err(TerrainError::DatasetParse(
                    "capability dataset must be a JSON object".into(),
                ))
            }
        };
        let entries = match root.remove("all") {
            Some(JsonValue::Object(all)) => all,
            Some(other) => {
                root.insert("all".to_string(), other);
                root
            }
            None => root,
        };

        let mut dataset = Dataset::default();
        for (key, value) in entries {
            match parse_entry(&key, value) {
                Ok(sample) => dataset.samples.push(sample),
                Err(reason) => {
                    warn!("skipping capability '{}': {}", key, reason);
                    dataset.skipped.push(key);
                }
            }
        }
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&CapabilitySample> {
        self.samples.iter().find(|s| s.key == key)
    }

    /// Samples in dataset order, restricted to one category when given.
    pub fn filtered(&self, category: Option<&str>) -> Vec<&CapabilitySample> {
        self.samples
            .iter()
            .filter(|s| category.map_or(true, |c| s.category == c))
            .collect()
    }

    pub fn categories(&self) -> BTreeSet<&str> {
        self.samples.iter().map(|s| s.category.as_str()).collect()
    }
}

fn parse_entry(key: &str, value: JsonValue) -> Result<CapabilitySample, String> {
    let raw: RawCapability =
        serde_json::from_value(value).map_err(|e| format!("malformed entry: {}", e))?;
    let position = match (raw.x, raw.y) {
        (Some(x), Some(y)) => Position::new(x, y)
            .ok_or_else(|| format!("position ({}, {}) outside the unit square", x, y))?,
        _ => return Err("missing position".to_string()),
    };

    let mut heights = BTreeMap::new();
    for (year, level) in raw.heights.unwrap_or_default() {
        match (year.trim().parse::<i32>(), level.as_f64()) {
            (Ok(year), Some(level)) if level.is_finite() => {
                heights.insert(year, level);
            }
            _ => warn!("capability '{}': ignoring height entry '{}'", key, year),
        }
    }

    Ok(CapabilitySample {
        key: key.to_string(),
        name: raw.name,
        description: raw.description,
        category: raw.category.unwrap_or_else(|| "unknown".to_string()),
        position,
        heights,
        top_models: parse_top_models(&raw.top_models),
    })
}

/// Accepts `{ "model": true, ... }` (falsy values dropped) or `["model", ...]`.
fn parse_top_models(value: &JsonValue) -> Option<BTreeSet<String>> {
    match value {
        JsonValue::Object(map) => Some(
            map.iter()
                .filter(|(_, v)| is_truthy(v))
                .map(|(k, _)| k.clone())
                .collect(),
        ),
        JsonValue::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map_or(false, |v| v != 0.0 && !v.is_nan()),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}
