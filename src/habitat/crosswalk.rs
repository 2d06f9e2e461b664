use std::{collections::{BTreeMap, BTreeSet}, fs, path::Path};

use ahash::AHashMap;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::HabitatPolygon;
use crate::{io::csv::read_csv_text_bytes, ModelError};

/// Normalized habitat class → raw source codes.
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    classes: BTreeMap<String, BTreeSet<String>>,
    lookup: AHashMap<String, String>,
}

impl Crosswalk {
    /// Build from `(class, raw codes)` entries. Underscores are removed from class keys.
    /// A raw code listed under several classes resolves to the first class in key order.
    pub fn new<I, C, R>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, R)>,
        C: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        let mut classes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (class, raws) in entries {
            let class = class.as_ref().trim().replace('_', "");
            if class.is_empty() { continue }
            classes.entry(class).or_default()
                .extend(raws.into_iter().map(|r| normalize_raw(r.as_ref())).filter(|r| !r.is_empty()));
        }

        let mut lookup = AHashMap::new();
        for (class, raws) in &classes {
            for raw in raws {
                lookup.entry(raw.clone()).or_insert_with(|| class.clone());
            }
        }
        Self { classes, lookup }
    }

    /// Load a crosswalk by extension: `.json` (`{class: [raw, ...]}`) or `.csv` (`raw_code,class`).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        let parse = match ext.as_deref() {
            Some("json") => Self::from_json_bytes,
            Some("csv") => Self::from_csv_bytes,
            _ => return Err(ModelError::config(format!(
                "unsupported crosswalk format (expected .json or .csv): {}", path.display())).into()),
        };
        if !path.is_file() {
            return Err(ModelError::config(format!("crosswalk not found: {}", path.display())).into());
        }
        let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        parse(&bytes).with_context(|| format!("Failed to parse crosswalk {}", path.display()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_slice(bytes)
            .context("crosswalk JSON must be an object of class -> [raw codes]")?;
        Ok(Self::new(raw))
    }

    /// Header row, then `raw_code,class` per row. Extra columns are ignored.
    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let df = read_csv_text_bytes(bytes)?;
        if df.width() < 2 {
            return Err(ModelError::config("crosswalk CSV needs two columns: raw_code,class").into());
        }
        if df.width() > 2 {
            warn!(columns = df.width(), "crosswalk CSV has extra columns; only the first two are used");
        }
        let names = df.get_column_names();
        let raws = df.column(names[0])?.str()?;
        let classes = df.column(names[1])?.str()?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (raw, class) in raws.into_iter().zip(classes.into_iter()) {
            if let (Some(raw), Some(class)) = (raw, class) {
                grouped.entry(class.to_string()).or_default().push(raw.to_string());
            }
        }
        Ok(Self::new(grouped))
    }

    /// Normalized class for a raw code.
    pub fn lookup(&self, raw: &str) -> Option<&str> {
        self.lookup.get(&normalize_raw(raw)).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    #[inline] pub fn len(&self) -> usize { self.classes.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.classes.is_empty() }
}

fn normalize_raw(raw: &str) -> String {
    raw.trim().replace(',', "")
}

/// Count and hectares of polygons sharing one unmatched code or class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Unmatched {
    pub count: usize,
    pub area_ha: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifyReport {
    pub classified: usize,
    pub already_classified: usize,
    /// Raw codes with no crosswalk entry (`<null>` for a missing code).
    pub unmatched: BTreeMap<String, Unmatched>,
}

impl ClassifyReport {
    pub fn unmatched_count(&self) -> usize {
        self.unmatched.values().map(|u| u.count).sum()
    }
}

/// Assign a normalized class to every polygon that has none.
///
/// Polygons already carrying a class are returned untouched, so running twice
/// gives the same result as running once.
pub fn classify(polygons: Vec<HabitatPolygon>, crosswalk: &Crosswalk) -> (Vec<HabitatPolygon>, ClassifyReport) {
    let mut report = ClassifyReport::default();

    let polygons = polygons.into_iter()
        .map(|mut p| {
            if p.class().is_some() {
                report.already_classified += 1;
                return p;
            }
            match p.raw_class.as_deref().and_then(|raw| crosswalk.lookup(raw)) {
                Some(class) => {
                    p.class = Some(class.to_string());
                    report.classified += 1;
                }
                None => {
                    let code = p.raw_class.clone().unwrap_or_else(|| "<null>".to_string());
                    let entry = report.unmatched.entry(code).or_default();
                    entry.count += 1;
                    entry.area_ha += p.area_ha;
                }
            }
            p
        })
        .collect::<Vec<_>>();

    if !report.unmatched.is_empty() {
        warn!(codes = report.unmatched.len(), polygons = report.unmatched_count(),
            "raw habitat codes with no crosswalk entry; polygons stay unclassified");
    }
    info!(classified = report.classified, already = report.already_classified, "classified habitat");
    (polygons, report)
}
