//! Run configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geoverlay::Crs;
use serde::{Deserialize, Serialize};

use crate::{habitat::AreaUnit, pipeline::StageSet, ModelError};

/// Everything a model run needs, loadable from JSON and overridable from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Scratch directory holding checkpoints and `manifest.json`.
    pub workspace: PathBuf,
    /// Directory receiving `summary.csv`, `summary.geojson` and `diagnostics.json`.
    pub output: PathBuf,

    /// Area of interest; defaults to the footprint of the reporting units.
    pub aoi: Option<PathBuf>,
    /// Split the AOI layer by this field and run each part as its own pipeline.
    pub aoi_key: Option<String>,

    pub units: Option<PathBuf>,
    pub unit_key: String,
    pub unit_name: Option<String>,

    pub wetland: Option<PathBuf>,
    pub crosswalk: Option<PathBuf>,
    /// Raw habitat code field of the wetland layer.
    pub habitat_field: String,

    /// Extra habitat layers, lower priority than the wetland layer and than each other in order.
    pub extras: Vec<PathBuf>,
    /// One crosswalk per extra layer.
    pub extra_crosswalks: Vec<PathBuf>,
    /// Raw code field per extra layer; empty means `habitat_field` for all.
    pub extra_fields: Vec<String>,

    pub kcal: Option<PathBuf>,
    pub kcal_units: AreaUnit,

    pub demand: Option<PathBuf>,
    pub admin_key: String,
    pub species_field: Option<String>,
    pub species: Option<String>,
    pub metrics: Vec<String>,

    /// Protected-land layers, highest priority first.
    pub protected: Vec<PathBuf>,
    pub urban: Option<PathBuf>,

    /// PROJ.4 definition of the equal-area working CRS.
    pub target_crs: String,
    /// CRS for inputs that carry none.
    pub source_crs: Option<String>,

    pub stages: StageSet,
    /// Clamp `available_ha` at 0 when urban and protected land exceed the unit.
    pub clamp_available_ha: bool,
    /// Output rename table (`original_field_name,field_name[,species]`).
    pub field_map: Option<PathBuf>,
    /// Worker threads for multi-AOI runs.
    pub jobs: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            output: PathBuf::from("output"),
            aoi: None,
            aoi_key: None,
            units: None,
            unit_key: "huc12".into(),
            unit_name: None,
            wetland: None,
            crosswalk: None,
            habitat_field: "ATTRIBUTE".into(),
            extras: Vec::new(),
            extra_crosswalks: Vec::new(),
            extra_fields: Vec::new(),
            kcal: None,
            kcal_units: AreaUnit::Ha,
            demand: None,
            admin_key: "CODE".into(),
            species_field: Some("species".into()),
            species: None,
            metrics: vec!["LTADemand".into()],
            protected: Vec::new(),
            urban: None,
            target_crs: Crs::ALBERS_CONUS.into(),
            source_crs: None,
            stages: StageSet::all(),
            clamp_available_ha: true,
            field_map: None,
            jobs: 1,
        }
    }
}

/// Input layer and crosswalk of one habitat source.
#[derive(Debug, Clone, PartialEq)]
pub struct HabitatInput<'a> {
    pub name: String,
    pub layer: &'a Path,
    pub crosswalk: &'a Path,
    pub field: &'a str,
}

fn required<'a>(value: &'a Option<PathBuf>, what: &str) -> Result<&'a Path, ModelError> {
    value.as_deref().ok_or_else(|| ModelError::config(format!("no {what} given")))
}

fn existing(path: &Path, what: &str) -> Result<(), ModelError> {
    if path.is_file() { Ok(()) } else { Err(ModelError::config(format!("{what} not found: {}", path.display()))) }
}

fn source_name(path: &Path) -> String {
    path.file_stem().and_then(|s| s.to_str()).unwrap_or("habitat").to_string()
}

impl ModelConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(ModelError::config(format!("config not found: {}", path.display())).into());
        }
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ModelError::config(format!("invalid config {}: {e}", path.display())).into())
    }

    pub fn target(&self) -> Crs { Crs::new(&self.target_crs) }

    pub fn source(&self) -> Option<Crs> { self.source_crs.as_deref().map(Crs::new) }

    /// Habitat sources in priority order: the wetland layer, then each extra layer.
    pub fn habitat_inputs(&self) -> Result<Vec<HabitatInput<'_>>> {
        let wetland = required(&self.wetland, "wetland layer")?;
        let mut inputs = vec![HabitatInput {
            name: source_name(wetland),
            layer: wetland,
            crosswalk: required(&self.crosswalk, "wetland crosswalk")?,
            field: &self.habitat_field,
        }];
        for (i, (layer, crosswalk)) in self.extras.iter().zip(&self.extra_crosswalks).enumerate() {
            inputs.push(HabitatInput {
                name: source_name(layer),
                layer,
                crosswalk,
                field: self.extra_fields.get(i).map(String::as_str).unwrap_or(&self.habitat_field),
            });
        }
        Ok(inputs)
    }

    /// Every configuration check; runs before any geometry is touched.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.workspace.as_os_str().is_empty() { return Err(ModelError::config("workspace path is empty")) }
        if self.output.as_os_str().is_empty() { return Err(ModelError::config("output path is empty")) }

        existing(required(&self.units, "reporting-unit layer")?, "reporting-unit layer")?;
        if self.unit_key.trim().is_empty() { return Err(ModelError::config("reporting-unit key field is empty")) }

        existing(required(&self.wetland, "wetland layer")?, "wetland layer")?;
        existing(required(&self.crosswalk, "wetland crosswalk")?, "crosswalk")?;

        if self.extras.len() != self.extra_crosswalks.len() {
            return Err(ModelError::config(format!(
                "{} extra habitat layers but {} extra crosswalks; each extra layer needs its own crosswalk",
                self.extras.len(), self.extra_crosswalks.len())));
        }
        if !self.extra_fields.is_empty() && self.extra_fields.len() != self.extras.len() {
            return Err(ModelError::config(format!(
                "{} extra habitat layers but {} extra habitat fields", self.extras.len(), self.extra_fields.len())));
        }
        for path in &self.extras { existing(path, "extra habitat layer")? }
        for path in &self.extra_crosswalks { existing(path, "extra crosswalk")? }

        for crosswalk in self.crosswalk.iter().chain(&self.extra_crosswalks) {
            let ext = crosswalk.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            if !matches!(ext.as_deref(), Some("json") | Some("csv")) {
                return Err(ModelError::config(format!(
                    "unsupported crosswalk format (expected .json or .csv): {}", crosswalk.display())));
            }
        }

        existing(required(&self.kcal, "energy table")?, "energy table")?;

        existing(required(&self.demand, "demand layer")?, "demand layer")?;
        if self.admin_key.trim().is_empty() { return Err(ModelError::config("demand admin key field is empty")) }
        if self.metrics.is_empty() { return Err(ModelError::config("at least one demand metric field is required")) }
        if self.species.is_some() && self.species_field.is_none() {
            return Err(ModelError::config("a species filter needs a species field"));
        }

        for path in &self.protected { existing(path, "protected layer")? }
        if let Some(path) = &self.urban { existing(path, "urban layer")? }
        if let Some(path) = &self.field_map { existing(path, "field map")? }

        match (&self.aoi, &self.aoi_key) {
            (Some(path), _) => existing(path, "AOI layer")?,
            (None, Some(_)) => return Err(ModelError::config("an AOI split key needs an AOI layer")),
            (None, None) => {}
        }

        if self.target_crs.trim().is_empty() { return Err(ModelError::config("target CRS is empty")) }
        if self.target().is_geographic() {
            return Err(ModelError::config("target CRS must be a projected equal-area system, not lon/lat"));
        }
        if self.jobs == 0 { return Err(ModelError::config("jobs must be at least 1")) }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::pipeline::Stage;

    /// A config whose every input exists under `dir`.
    fn complete(dir: &Path) -> ModelConfig {
        let touch = |name: &str| {
            let path = dir.join(name);
            fs::write(&path, b"").unwrap();
            path
        };
        ModelConfig {
            workspace: dir.join("ws"),
            output: dir.join("out"),
            units: Some(touch("huc12.geojson")),
            wetland: Some(touch("nwi.shp")),
            crosswalk: Some(touch("crosswalk.csv")),
            kcal: Some(touch("kcal.csv")),
            demand: Some(touch("demand.geojson")),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn complete_config_validates() {
        let dir = tempfile::tempdir().unwrap();
        complete(dir.path()).validate().unwrap();
    }

    #[test]
    fn missing_inputs_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig { kcal: Some(dir.path().join("nope.csv")), ..complete(dir.path()) };
        assert!(matches!(cfg.validate(), Err(ModelError::Config(m)) if m.contains("energy table")));

        let cfg = ModelConfig { wetland: None, ..complete(dir.path()) };
        assert!(matches!(cfg.validate(), Err(ModelError::Config(_))));
    }

    #[test]
    fn extras_need_matching_crosswalks() {
        let dir = tempfile::tempdir().unwrap();
        let base = complete(dir.path());
        let extra = dir.path().join("ncwn.geojson");
        fs::write(&extra, b"").unwrap();
        let cfg = ModelConfig { extras: vec![extra], ..base };
        assert!(matches!(cfg.validate(), Err(ModelError::Config(m)) if m.contains("extra crosswalks")));
    }

    #[test]
    fn crosswalk_extension_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let xlsx = dir.path().join("crosswalk.xlsx");
        fs::write(&xlsx, b"").unwrap();
        let cfg = ModelConfig { crosswalk: Some(xlsx), ..complete(dir.path()) };
        assert!(matches!(cfg.validate(), Err(ModelError::Config(m)) if m.contains("crosswalk format")));
    }

    #[test]
    fn geographic_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig { target_crs: Crs::nad83().proj4().into(), ..complete(dir.path()) };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn json_round_trip_with_defaults() {
        let cfg: ModelConfig = serde_json::from_str(r#"{"units": "u.geojson", "stages": "1111110", "kcal_units": "acre"}"#).unwrap();
        assert_eq!(cfg.habitat_field, "ATTRIBUTE");
        assert_eq!(cfg.kcal_units, AreaUnit::Acre);
        assert!(!cfg.stages.is_enabled(Stage::WeightedMean));
        assert!(serde_json::from_str::<ModelConfig>(r#"{"bogus": 1}"#).is_err());
    }

    #[test]
    fn habitat_inputs_pair_layers_with_crosswalks() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ModelConfig {
            extras: vec!["a/ncwn.shp".into()],
            extra_crosswalks: vec!["a/ncwn.json".into()],
            extra_fields: vec!["LANDCOVER".into()],
            ..complete(dir.path())
        };
        let inputs = cfg.habitat_inputs().unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].name, "nwi");
        assert_eq!(inputs[0].field, "ATTRIBUTE");
        assert_eq!(inputs[1].name, "ncwn");
        assert_eq!(inputs[1].field, "LANDCOVER");
    }
}
