use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{habitat::{ClassifyReport, EnergyReport}, summary::ComposeReport};

/// Data-quality gaps of one habitat source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub classify: ClassifyReport,
    pub energy: EnergyReport,
}

/// Data-quality findings of one run, written to `diagnostics.json`.
///
/// Nothing here is an error: unmatched codes and classes only drop polygons
/// from the energy totals, and negative available hectares are clamped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub aoi: String,
    /// Keyed by habitat source name.
    pub sources: BTreeMap<String, SourceReport>,
    pub compose: ComposeReport,
    /// Stages served from their checkpoint instead of recomputed.
    pub reused_stages: Vec<String>,
}

impl Diagnostics {
    pub fn new(aoi: &str) -> Self {
        Self { aoi: aoi.to_string(), ..Self::default() }
    }

    /// Distinct raw codes missing from a crosswalk, summed over sources.
    pub fn unmatched_codes(&self) -> usize {
        self.sources.values().map(|s| s.classify.unmatched.len()).sum()
    }

    /// Polygons left unclassified by a missing crosswalk entry.
    pub fn unclassified_polygons(&self) -> usize {
        self.sources.values().map(|s| s.classify.unmatched_count()).sum()
    }

    /// Classes missing from the energy table, summed over sources.
    pub fn unmatched_classes(&self) -> usize {
        self.sources.values().map(|s| s.energy.unmatched_classes.len()).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.unmatched_codes() == 0
            && self.unmatched_classes() == 0
            && self.compose.negative_available_ha.is_empty()
            && self.compose.undefined_goals.is_empty()
    }

    /// One warning line summarizing the gaps, if any.
    pub fn log(&self) {
        if self.is_clean() { return }
        warn!(
            aoi = %self.aoi,
            unmatched_codes = self.unmatched_codes(),
            unclassified_polygons = self.unclassified_polygons(),
            unmatched_classes = self.unmatched_classes(),
            negative_available_ha = self.compose.negative_available_ha.len(),
            undefined_goals = self.compose.undefined_goals.len(),
            "data-quality gaps recorded in diagnostics.json"
        );
    }
}
