//! Memoized terrain passes and field fingerprints.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::dataset::Dataset;
use crate::interpolate::HeightField;
use crate::overview::CategoryConfig;
use crate::{compute_terrain, Params, TerrainError, TerrainSnapshot};

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// SHA-256 over the bit patterns of every height and influence value.
///
/// Equal fingerprints mean bit-identical fields.
pub fn fingerprint(field: &HeightField) -> String {
    let (rows, cols) = field.heights.dim();
    let mut bytes = Vec::with_capacity(16 + rows * cols * 16);
    bytes.extend_from_slice(&(rows as u64).to_le_bytes());
    bytes.extend_from_slice(&(cols as u64).to_le_bytes());
    for h in field.heights.iter() {
        bytes.extend_from_slice(&h.to_bits().to_le_bytes());
    }
    for w in field.influence.iter() {
        bytes.extend_from_slice(&w.to_bits().to_le_bytes());
    }
    sha256_hex(&bytes)
}

impl HeightField {
    pub fn fingerprint(&self) -> String {
        fingerprint(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub year: i32,
    pub filter_category: Option<String>,
    pub grid_resolution: usize,
}

impl FieldKey {
    pub fn from_params(params: &Params) -> Self {
        Self {
            year: params.year,
            filter_category: params.filter_category.clone(),
            grid_resolution: params.terrain.grid_resolution,
        }
    }
}

/// Params with the keyed fields blanked, so two requests that differ only
/// in their key compare equal.
fn unkeyed(params: &Params) -> Params {
    let mut base = params.clone();
    base.year = 0;
    base.filter_category = None;
    base.terrain.grid_resolution = 0;
    base
}

/// Snapshot memo over one immutable dataset.
///
/// Entries are keyed by [`FieldKey`]; any change to the remaining parameters,
/// or replacing the dataset, drops every entry.
#[derive(Debug)]
pub struct FieldCache {
    dataset: Dataset,
    categories: CategoryConfig,
    base: Option<Params>,
    entries: HashMap<FieldKey, Arc<TerrainSnapshot>>,
    hits: u64,
    misses: u64,
}

impl FieldCache {
    pub fn new(dataset: Dataset, categories: CategoryConfig) -> Self {
        Self {
            dataset,
            categories,
            base: None,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get_or_compute(&mut self, params: &Params) -> Result<Arc<TerrainSnapshot>, TerrainError> {
        let base = unkeyed(params);
        if self.base.as_ref() != Some(&base) {
            if !self.entries.is_empty() {
                debug!("field cache: parameters changed, dropping {} entries", self.entries.len());
            }
            self.entries.clear();
            self.base = Some(base);
        }

        let key = FieldKey::from_params(params);
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            debug!("field cache hit: year {} filter {:?}", key.year, key.filter_category);
            return Ok(Arc::clone(hit));
        }

        self.misses += 1;
        let snapshot = Arc::new(compute_terrain(&self.dataset, &self.categories, params)?);
        self.entries.insert(key, Arc::clone(&snapshot));
        Ok(snapshot)
    }

    pub fn replace_dataset(&mut self, dataset: Dataset) {
        self.dataset = dataset;
        self.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// `(hits, misses)` since construction.
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
