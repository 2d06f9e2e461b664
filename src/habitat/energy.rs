use std::{collections::BTreeMap, path::Path, str::FromStr};

use anyhow::{bail, Result};
use geoverlay::GeometryEngine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{HabitatPolygon, Unmatched};
use crate::{io::csv::read_csv_text, ModelError};

/// Acres per hectare.
pub const ACRES_PER_HA: f64 = 2.471_05;

/// Area unit an energy table is expressed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaUnit {
    #[default]
    Ha,
    Acre,
}

impl FromStr for AreaUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ha" | "hectare" | "hectares" => Ok(AreaUnit::Ha),
            "acre" | "acres" | "ac" => Ok(AreaUnit::Acre),
            other => bail!("unknown area unit '{other}' (expected ha or acre)"),
        }
    }
}

/// Normalized class → kcal/ha.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyTable {
    kcal_per_ha: BTreeMap<String, f64>,
}

impl EnergyTable {
    /// Class keys are normalized the same way as crosswalk classes.
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        Self {
            kcal_per_ha: entries.into_iter()
                .map(|(k, v)| (k.as_ref().trim().replace('_', ""), v))
                .collect(),
        }
    }

    /// Read a `habitatType,kcal` CSV; per-acre values are converted to per-hectare.
    pub fn from_csv(path: &Path, unit: AreaUnit) -> Result<Self> {
        if !path.is_file() {
            return Err(ModelError::config(format!("energy table not found: {}", path.display())).into());
        }
        let df = read_csv_text(path)?;
        let names = df.get_column_names();
        let find = |name: &str| names.iter().find(|n| n.eq_ignore_ascii_case(name)).map(|n| n.as_str());
        let (Some(class_col), Some(kcal_col)) = (find("habitatType"), find("kcal")) else {
            return Err(ModelError::config(format!(
                "energy table {} needs columns habitatType,kcal", path.display())).into());
        };

        let factor = match unit { AreaUnit::Ha => 1.0, AreaUnit::Acre => ACRES_PER_HA };
        let classes = df.column(class_col)?.str()?;
        let kcal = df.column(kcal_col)?.str()?;

        let mut entries = Vec::with_capacity(df.height());
        for (class, value) in classes.into_iter().zip(kcal.into_iter()) {
            let (Some(class), Some(value)) = (class, value) else { continue };
            let Ok(value) = value.trim().parse::<f64>() else {
                bail!("energy table {}: kcal for '{class}' is not a number: '{value}'", path.display());
            };
            entries.push((class.to_string(), value * factor));
        }
        Ok(Self::new(entries))
    }

    #[inline]
    pub fn get(&self, class: &str) -> Option<f64> {
        self.kcal_per_ha.get(class).copied()
    }

    #[inline] pub fn len(&self) -> usize { self.kcal_per_ha.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.kcal_per_ha.is_empty() }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyReport {
    pub computed: usize,
    pub already_computed: usize,
    pub unclassified: Unmatched,
    /// Classes missing from the energy table.
    pub unmatched_classes: BTreeMap<String, Unmatched>,
}

/// Compute `area_ha`, `kcal_per_ha` and `avail_kcal` for polygons without energy.
///
/// Area is always re-derived from the geometry. Polygons that already carry
/// energy are left untouched. Unclassified polygons and classes missing from
/// the table keep null energy and are reported.
pub fn apply_energy(engine: &dyn GeometryEngine, polygons: Vec<HabitatPolygon>, table: &EnergyTable) -> (Vec<HabitatPolygon>, EnergyReport) {
    let mut report = EnergyReport::default();

    let polygons = polygons.into_iter()
        .map(|mut p| {
            if p.avail_kcal.is_some() {
                report.already_computed += 1;
                return p;
            }
            p.area_ha = engine.area_hectares(&p.geometry);

            let Some(class) = p.class().map(str::to_string) else {
                report.unclassified.count += 1;
                report.unclassified.area_ha += p.area_ha;
                return p;
            };
            match table.get(&class) {
                Some(density) => {
                    p.kcal_per_ha = Some(density);
                    p.avail_kcal = Some(p.area_ha * density);
                    report.computed += 1;
                }
                None => {
                    let entry = report.unmatched_classes.entry(class).or_default();
                    entry.count += 1;
                    entry.area_ha += p.area_ha;
                }
            }
            p
        })
        .collect::<Vec<_>>();

    if !report.unmatched_classes.is_empty() {
        warn!(classes = ?report.unmatched_classes.keys().collect::<Vec<_>>(),
            "habitat classes missing from the energy table; energy left null");
    }
    if report.unclassified.count > 0 {
        warn!(polygons = report.unclassified.count, area_ha = report.unclassified.area_ha,
            "unclassified polygons excluded from energy");
    }
    info!(computed = report.computed, already = report.already_computed, "computed habitat energy");
    (polygons, report)
}
