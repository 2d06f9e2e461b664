use std::{collections::{BTreeMap, HashMap}, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use geo::MultiPolygon;
use geoverlay::{Crs, GeometryEngine};
use polars::prelude::*;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{info, info_span, warn};

use super::{
    checkpoint::{CheckpointState, Fingerprint, Manifest},
    diagnostics::{Diagnostics, SourceReport},
    Stage, Workspace,
};
use crate::{
    aggregate::{aggregate_by_area, aggregate_by_energy, unit_geometries, DemandLayer, ReportingUnit, Stat, BIN},
    common::{ensure_dir_exists, write_atomic},
    config::ModelConfig,
    habitat::{apply_energy, assemble_supply, classify, keys, Crosswalk, EnergyTable, HabitatPolygon},
    io::{csv, geojson, load_layer, read_layer, Feature, Layer},
    protected::{merge_protected, protected_supply, ProtectedLand, ProtectedSource},
    summary::{class_shares, cols, compose, weighted_mean, ComposeInputs, ComposeOptions, FieldMap, UnitSummary},
    ModelError,
};

/// Workspace artifact names.
mod artifacts {
    pub const SUPPLY: &str = "supply.geojson";
    pub const SUPPLY_REPORT: &str = "supply_report.json";
    pub const PROTECTED: &str = "protected.geojson";
    pub const SUPPLY_AREAL: &str = "supply_areal.csv";
    pub const DEMAND: &str = "demand.csv";
    pub const PROTECTED_AREAL: &str = "protected_areal.csv";
    pub const PROTECTED_ENERGY: &str = "protected_energy.csv";
    pub const URBAN_AREAL: &str = "urban_areal.csv";
    pub const WT_MEAN: &str = "wt_mean.csv";
}

/// Output file names.
pub mod outputs {
    pub const SUMMARY_CSV: &str = "summary.csv";
    pub const SUMMARY_GEOJSON: &str = "summary.geojson";
    pub const DIAGNOSTICS: &str = "diagnostics.json";
}

/// One area of interest with its own workspace and output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    pub name: String,
    /// `None` means the footprint of the reporting units.
    pub boundary: Option<MultiPolygon<f64>>,
    pub workspace: PathBuf,
    pub output: PathBuf,
}

/// Result of one AOI pipeline.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub aoi: String,
    pub output: PathBuf,
    /// Composed table before output renames.
    pub summary: DataFrame,
    pub rows: Vec<UnitSummary>,
    pub diagnostics: Diagnostics,
}

fn dir_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

/// The AOIs a configuration describes: one per distinct `aoi_key` value, one
/// for a plain AOI layer, or a single unbounded AOI.
pub fn areas_of_interest(engine: &dyn GeometryEngine, config: &ModelConfig) -> Result<Vec<Aoi>> {
    let Some(path) = &config.aoi else {
        return Ok(vec![Aoi {
            name: "all".into(),
            boundary: None,
            workspace: config.workspace.clone(),
            output: config.output.clone(),
        }]);
    };

    let layer = read_layer(path)?;
    if layer.is_empty() {
        return Err(ModelError::config(format!("AOI layer has no features: {}", path.display())).into());
    }
    if let Some(key) = &config.aoi_key { layer.require_field(key)? }
    let layer = layer.reproject(engine, &config.target(), config.source().as_ref())?;
    let footprint = |shapes: &[MultiPolygon<f64>]| engine.dissolve(shapes).map_err(|e| ModelError::geometry("AOI", e));

    let Some(key) = &config.aoi_key else {
        return Ok(vec![Aoi {
            name: layer.name.clone(),
            boundary: Some(footprint(&layer.geometries())?),
            workspace: config.workspace.clone(),
            output: config.output.clone(),
        }]);
    };

    let mut groups: BTreeMap<String, Vec<MultiPolygon<f64>>> = BTreeMap::new();
    for (i, feature) in layer.features.iter().enumerate() {
        let value = feature.text(key).ok_or_else(|| ModelError::config(format!(
            "AOI feature {i} in '{}' has no value for '{key}'", layer.name)))?;
        groups.entry(value).or_default().push(feature.geometry.clone());
    }
    groups.into_iter()
        .map(|(name, shapes)| -> Result<Aoi> {
            Ok(Aoi {
                boundary: Some(footprint(&shapes)?),
                workspace: config.workspace.join(dir_name(&name)),
                output: config.output.join(dir_name(&name)),
                name,
            })
        })
        .collect()
}

/// Run the model for every AOI of `config`.
///
/// Several AOIs run as independent pipelines on a pool of `config.jobs` threads.
pub fn run_model(engine: &dyn GeometryEngine, config: &ModelConfig) -> Result<Vec<RunOutcome>> {
    config.validate()?;
    let field_map = config.field_map.as_deref().map(FieldMap::from_path).transpose()?;
    let aois = areas_of_interest(engine, config)?;
    info!(aois = aois.len(), jobs = config.jobs, "starting model run");

    if aois.len() == 1 {
        return aois.iter().map(|aoi| run_aoi(engine, config, field_map.as_ref(), aoi)).collect();
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()
        .context("Failed to build AOI worker pool")?;
    pool.install(|| {
        aois.par_iter()
            .map(|aoi| run_aoi(engine, config, field_map.as_ref(), aoi)
                .with_context(|| format!("AOI '{}' failed", aoi.name)))
            .collect()
    })
}

/// Run one AOI pipeline end to end.
pub fn run_aoi(engine: &dyn GeometryEngine, config: &ModelConfig, field_map: Option<&FieldMap>, aoi: &Aoi) -> Result<RunOutcome> {
    let span = info_span!("aoi", name = %aoi.name);
    let _guard = span.enter();

    let mut pipeline = Pipeline::open(engine, config, aoi)?;
    pipeline.run_stages()?;
    pipeline.finish(field_map)
}

/// Per-AOI state shared by the stages.
struct Pipeline<'a> {
    engine: &'a dyn GeometryEngine,
    config: &'a ModelConfig,
    aoi: &'a Aoi,
    target: Crs,
    fallback: Option<Crs>,
    boundary: MultiPolygon<f64>,
    units: Vec<ReportingUnit>,
    ws: Workspace,
    manifest: Manifest,
    fingerprints: BTreeMap<Stage, String>,
    diagnostics: Diagnostics,
    supply: Option<Vec<HabitatPolygon>>,
}

impl<'a> Pipeline<'a> {
    fn open(engine: &'a dyn GeometryEngine, config: &'a ModelConfig, aoi: &'a Aoi) -> Result<Self> {
        let target = config.target();
        let fallback = config.source();
        let ws = Workspace::open(&aoi.workspace, target.clone())?;
        let manifest = Manifest::load(&ws)?;

        let units_path = config.units.as_deref().ok_or_else(|| ModelError::config("no reporting-unit layer given"))?;
        let mut units_layer = load_layer(engine, units_path, &target, fallback.as_ref(), None)?;
        if let Some(boundary) = &aoi.boundary {
            units_layer = units_layer.clip(engine, boundary)?;
        }
        let units = ReportingUnit::from_layer(&units_layer, &config.unit_key, config.unit_name.as_deref())?;
        if units.is_empty() {
            return Err(ModelError::config(format!("no reporting units inside AOI '{}'", aoi.name)).into());
        }
        let boundary = match &aoi.boundary {
            Some(b) => b.clone(),
            None => engine.dissolve(&unit_geometries(&units)).map_err(|e| ModelError::geometry("AOI", e))?,
        };
        info!(units = units.len(), workspace = %ws.root().display(), "opened AOI");

        let mut pipeline = Self {
            engine, config, aoi, target, fallback, boundary, units, ws, manifest,
            fingerprints: BTreeMap::new(),
            diagnostics: Diagnostics::new(&aoi.name),
            supply: None,
        };
        for stage in Stage::ALL {
            let fp = pipeline.fingerprint(stage)?;
            pipeline.fingerprints.insert(stage, fp);
        }
        Ok(pipeline)
    }

    /// Stage inputs and parameters, chained to the fingerprints of upstream stages.
    fn fingerprint(&self, stage: Stage) -> Result<String> {
        let cfg = self.config;
        let mut fp = Fingerprint::new(stage)
            .param("aoi", &self.aoi.name)?
            .optional_input("aoi", cfg.aoi.as_deref())?
            .param("aoi_key", &cfg.aoi_key)?
            .param("target_crs", &cfg.target_crs)?
            .param("source_crs", &cfg.source_crs)?;
        for upstream in stage.upstream() {
            fp = fp.upstream(*upstream, &self.fingerprints[upstream]);
        }
        // Without an AOI layer every input is clipped to the units footprint.
        if cfg.aoi.is_none() || !matches!(stage, Stage::Supply | Stage::Protected) {
            fp = fp.optional_input("units", cfg.units.as_deref())?
                .param("unit_key", &cfg.unit_key)?;
        }

        fp = match stage {
            Stage::Supply => {
                let mut fp = fp.optional_input("kcal", cfg.kcal.as_deref())?.param("kcal_units", &cfg.kcal_units)?;
                for (i, input) in cfg.habitat_inputs()?.iter().enumerate() {
                    fp = fp.input(&format!("habitat{i}"), input.layer)?
                        .input(&format!("crosswalk{i}"), input.crosswalk)?
                        .param(&format!("field{i}"), input.field)?;
                }
                fp
            }
            Stage::Protected => {
                let mut fp = fp.param("protected_layers", &cfg.protected.len())?;
                for (i, path) in cfg.protected.iter().enumerate() {
                    fp = fp.input(&format!("protected{i}"), path)?;
                }
                fp
            }
            Stage::Demand => fp.optional_input("demand", cfg.demand.as_deref())?
                .param("admin_key", &cfg.admin_key)?
                .param("species_field", &cfg.species_field)?
                .param("species", &cfg.species)?
                .param("metrics", &cfg.metrics)?,
            Stage::UrbanAreal => fp.optional_input("urban", cfg.urban.as_deref())?,
            Stage::SupplyAreal | Stage::ProtectedAreal | Stage::WeightedMean => fp,
        };
        Ok(fp.finish())
    }

    fn run_stages(&mut self) -> Result<()> {
        for stage in Stage::ALL {
            self.run_stage(stage)?;
        }
        Ok(())
    }

    /// Serve `stage` from its checkpoint when fresh, else compute and record it.
    fn run_stage(&mut self, stage: Stage) -> Result<()> {
        let fingerprint = self.fingerprints[&stage].clone();
        match self.manifest.check(&self.ws, stage, &fingerprint) {
            CheckpointState::Fresh => {
                info!(%stage, "checkpoint is fresh; skipping");
                self.diagnostics.reused_stages.push(stage.to_str().into());
                return Ok(());
            }
            state if !self.config.stages.is_enabled(stage) => {
                let detail = match state {
                    CheckpointState::Stale(why) => format!("stage is disabled but its checkpoint is stale ({why})"),
                    _ => "stage is disabled and has no checkpoint".into(),
                };
                return Err(ModelError::Checkpoint { stage: stage.to_str().into(), detail }.into());
            }
            CheckpointState::Stale(why) => info!(%stage, reason = %why, "recomputing stale stage"),
            CheckpointState::Missing => info!(%stage, "running stage"),
        }

        self.manifest.invalidate(stage);
        let files = match stage {
            Stage::Supply => self.build_supply()?,
            Stage::Protected => self.build_protected()?,
            Stage::SupplyAreal => self.build_supply_areal()?,
            Stage::Demand => self.build_demand()?,
            Stage::ProtectedAreal => self.build_protected_areal()?,
            Stage::UrbanAreal => self.build_urban_areal()?,
            Stage::WeightedMean => self.build_weighted_mean()?,
        };
        self.manifest.record(&self.ws, stage, &fingerprint, &files)?;
        self.manifest.save(&self.ws)
    }

    fn load(&self, path: &Path) -> Result<Layer> {
        load_layer(self.engine, path, &self.target, self.fallback.as_ref(), Some(&self.boundary))
    }

    /// Supply layer, read back from its checkpoint once.
    fn supply(&mut self) -> Result<&[HabitatPolygon]> {
        if self.supply.is_none() {
            self.supply = Some(self.ws.read_habitat(artifacts::SUPPLY)?);
        }
        Ok(self.supply.as_deref().unwrap_or_default())
    }

    fn build_supply(&mut self) -> Result<Vec<&'static str>> {
        let kcal_path = self.config.kcal.as_deref().ok_or_else(|| ModelError::config("no energy table given"))?;
        let table = EnergyTable::from_csv(kcal_path, self.config.kcal_units)?;

        let mut sources = Vec::new();
        let mut reports: BTreeMap<String, SourceReport> = BTreeMap::new();
        for input in self.config.habitat_inputs()? {
            let crosswalk = Crosswalk::from_path(input.crosswalk)?;
            let layer = self.load(input.layer)?;
            layer.require_field(input.field)?;

            let (polygons, classify_report) = classify(HabitatPolygon::from_layer(&layer, input.field), &crosswalk);
            let (polygons, energy_report) = apply_energy(self.engine, polygons, &table);
            info!(source = %input.name, polygons = polygons.len(), classified = classify_report.classified, rated = energy_report.computed, "prepared habitat source");

            let mut name = input.name.clone();
            if reports.contains_key(&name) { name = format!("{name}_{}", sources.len()) }
            reports.insert(name, SourceReport { classify: classify_report, energy: energy_report });
            sources.push(polygons);
        }

        let supply = assemble_supply(self.engine, sources)?;
        self.ws.write_habitat(artifacts::SUPPLY, &supply)?;
        self.ws.write(artifacts::SUPPLY_REPORT, &serde_json::to_vec_pretty(&reports)?)?;
        self.supply = Some(supply);
        Ok(vec![artifacts::SUPPLY, artifacts::SUPPLY_REPORT])
    }

    fn build_protected(&mut self) -> Result<Vec<&'static str>> {
        let sources = self.config.protected.iter()
            .map(|path| -> Result<ProtectedSource> { Ok(ProtectedSource::from_layer(&self.load(path)?)) })
            .collect::<Result<Vec<_>>>()?;
        let merged = merge_protected(self.engine, &sources)?;
        self.ws.write_protected(artifacts::PROTECTED, &merged)?;
        Ok(vec![artifacts::PROTECTED])
    }

    fn build_supply_areal(&mut self) -> Result<Vec<&'static str>> {
        let engine = self.engine;
        let habitat: Vec<HabitatPolygon> = self.supply()?.iter().filter(|p| p.class().is_some()).cloned().collect();
        let df = habitat_frame(&habitat)?;
        let geoms: Vec<MultiPolygon<f64>> = habitat.iter().map(|p| p.geometry.clone()).collect();
        let table = aggregate_by_area(engine, &self.units, &geoms, &df, Stat::Sum)?;
        self.ws.write_table(artifacts::SUPPLY_AREAL, &table)?;
        Ok(vec![artifacts::SUPPLY_AREAL])
    }

    fn build_demand(&mut self) -> Result<Vec<&'static str>> {
        let path = self.config.demand.as_deref().ok_or_else(|| ModelError::config("no demand layer given"))?;
        let layer = self.load(path)?;
        let mut demand = DemandLayer::from_layer(&layer, &self.config.admin_key, self.config.species_field.as_deref(), &self.config.metrics)?;
        if let Some(species) = &self.config.species {
            demand = demand.filter_species(species);
            if demand.polygons.is_empty() { warn!(%species, "no demand polygons for species") }
        }

        let engine = self.engine;
        let units = self.units.clone();
        let table = if demand.polygons.is_empty() {
            empty_table(&demand.metrics)?
        } else {
            aggregate_by_energy(engine, &units, self.supply()?, &demand)?
        };
        self.ws.write_table(artifacts::DEMAND, &table)?;
        Ok(vec![artifacts::DEMAND])
    }

    fn build_protected_areal(&mut self) -> Result<Vec<&'static str>> {
        let engine = self.engine;
        let protected = self.ws.read_protected(artifacts::PROTECTED)?;
        let inside = protected_supply(engine, self.supply()?, &protected)?;

        let geoms: Vec<MultiPolygon<f64>> = protected.iter().map(|p| p.geometry.clone()).collect();
        let df = protected_frame(&protected)?;
        let area = aggregate_by_area(engine, &self.units, &geoms, &df, Stat::Sum)?;

        let rated: Vec<HabitatPolygon> = inside.into_iter().filter(|p| p.class().is_some()).collect();
        let geoms: Vec<MultiPolygon<f64>> = rated.iter().map(|p| p.geometry.clone()).collect();
        let energy = aggregate_by_area(engine, &self.units, &geoms, &habitat_frame(&rated)?, Stat::Sum)?;

        self.ws.write_table(artifacts::PROTECTED_AREAL, &area)?;
        self.ws.write_table(artifacts::PROTECTED_ENERGY, &energy)?;
        Ok(vec![artifacts::PROTECTED_AREAL, artifacts::PROTECTED_ENERGY])
    }

    fn build_urban_areal(&mut self) -> Result<Vec<&'static str>> {
        let geoms = match self.config.urban.as_deref() {
            Some(path) => {
                let footprint = self.engine.dissolve(&self.load(path)?.geometries())
                    .map_err(|e| ModelError::geometry("urban", e))?;
                if footprint.0.is_empty() { vec![] } else { vec![footprint] }
            }
            None => vec![],
        };
        let df = df!(keys::AREA_HA => geoms.iter().map(|g| self.engine.area_hectares(g)).collect::<Vec<f64>>())?;
        let table = aggregate_by_area(self.engine, &self.units, &geoms, &df, Stat::Sum)?;
        self.ws.write_table(artifacts::URBAN_AREAL, &table)?;
        Ok(vec![artifacts::URBAN_AREAL])
    }

    fn build_weighted_mean(&mut self) -> Result<Vec<&'static str>> {
        let engine = self.engine;
        let units = self.units.clone();
        let wt = weighted_mean(&class_shares(engine, &units, self.supply()?)?);
        self.ws.write_table(artifacts::WT_MEAN, &wt_frame(&wt)?)?;
        Ok(vec![artifacts::WT_MEAN])
    }

    /// Compose the summary from the stage tables and write the outputs.
    fn finish(mut self, field_map: Option<&FieldMap>) -> Result<RunOutcome> {
        let table = |rel: &str| self.ws.read_table(rel, BIN);
        let wt_table = table(artifacts::WT_MEAN)?;
        let inputs = ComposeInputs {
            supply: table(artifacts::SUPPLY_AREAL)?,
            demand: table(artifacts::DEMAND)?,
            protected: table(artifacts::PROTECTED_AREAL)?,
            protected_energy: table(artifacts::PROTECTED_ENERGY)?,
            urban: table(artifacts::URBAN_AREAL)?,
            wt_mean: wt_from_frame(&wt_table)?,
        };
        let options = ComposeOptions {
            metrics: self.config.metrics.clone(),
            clamp_available_ha: self.config.clamp_available_ha,
            ..ComposeOptions::default()
        };
        let (summary, report) = compose(self.engine, &self.units, &inputs, &options)?;
        let rows = UnitSummary::from_frame(&summary, &options.metrics)?;

        self.diagnostics.sources = serde_json::from_slice(&self.ws.read(artifacts::SUPPLY_REPORT)?)
            .context("Failed to parse supply_report.json")?;
        self.diagnostics.compose = report;
        self.diagnostics.log();

        let renamed = match field_map {
            Some(map) => map.apply(summary.clone(), self.config.species.as_deref())?,
            None => summary.clone(),
        };

        let out = &self.aoi.output;
        ensure_dir_exists(out)?;
        csv::write_csv(&out.join(outputs::SUMMARY_CSV), &renamed)?;
        write_atomic(&out.join(outputs::SUMMARY_GEOJSON), &summary_geojson(&renamed, &self.units, &self.target)?)?;
        write_atomic(&out.join(outputs::DIAGNOSTICS), &serde_json::to_vec_pretty(&self.diagnostics)?)?;
        info!(units = rows.len(), output = %out.display(), "wrote summary");

        Ok(RunOutcome {
            aoi: self.aoi.name.clone(),
            output: out.clone(),
            summary,
            rows,
            diagnostics: self.diagnostics,
        })
    }
}

/// `area_ha` and `avail_kcal` of habitat polygons, row-aligned with them.
fn habitat_frame(polygons: &[HabitatPolygon]) -> Result<DataFrame> {
    Ok(df!(
        keys::AREA_HA => polygons.iter().map(|p| p.area_ha).collect::<Vec<f64>>(),
        keys::AVAIL_KCAL => polygons.iter().map(|p| p.avail_kcal).collect::<Vec<Option<f64>>>(),
    )?)
}

fn protected_frame(lands: &[ProtectedLand]) -> Result<DataFrame> {
    Ok(df!(keys::AREA_HA => lands.iter().map(|p| p.area_ha).collect::<Vec<f64>>())?)
}

fn empty_table(metrics: &[String]) -> Result<DataFrame> {
    let mut columns = vec![Column::new(BIN.into(), Vec::<&str>::new())];
    columns.extend(metrics.iter().map(|m| Column::new(m.as_str().into(), Vec::<f64>::new())));
    Ok(DataFrame::new(columns)?)
}

fn wt_frame(wt: &BTreeMap<String, f64>) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new(BIN.into(), wt.keys().map(String::as_str).collect::<Vec<_>>()),
        Column::new(cols::WT_MEAN_KCAL.into(), wt.values().copied().collect::<Vec<_>>()),
    ])?)
}

fn wt_from_frame(df: &DataFrame) -> Result<BTreeMap<String, f64>> {
    let bins = df.column(BIN)?.str()?;
    let values = df.column(cols::WT_MEAN_KCAL)?.cast(&DataType::Float64)?;
    Ok(bins.into_iter()
        .zip(values.f64()?.into_iter())
        .filter_map(|(bin, v)| Some((bin?.to_string(), v.unwrap_or(0.0))))
        .collect())
}

/// Unit polygons carrying every summary column as properties.
fn summary_geojson(summary: &DataFrame, units: &[ReportingUnit], crs: &Crs) -> Result<Vec<u8>> {
    let geometry: HashMap<&str, &MultiPolygon<f64>> = units.iter().map(|u| (u.key.as_str(), &u.geometry)).collect();

    let mut columns: Vec<(String, Vec<Value>)> = Vec::with_capacity(summary.width());
    for column in summary.get_columns() {
        let values: Vec<Value> = if column.dtype() == &DataType::String {
            column.str()?.into_iter().map(|v| v.map_or(Value::Null, Value::from)).collect()
        } else {
            column.cast(&DataType::Float64)?.f64()?.into_iter().map(|v| v.map_or(Value::Null, Value::from)).collect()
        };
        columns.push((column.name().to_string(), values));
    }

    // Renames may have moved the key column; the composed table keeps row order.
    let features: Vec<Feature> = units_in_order(summary, units)?
        .into_iter()
        .enumerate()
        .map(|(row, key)| {
            let shape = geometry.get(key.as_str()).map(|g| (*g).clone()).unwrap_or_else(|| MultiPolygon::new(vec![]));
            columns.iter().fold(Feature::new(shape), |f, (name, values)| f.with(name, values[row].clone()))
        })
        .collect();
    geojson::write_geojson_bytes(&features, Some(crs))
}

/// Unit keys in summary row order (rows are sorted by key).
fn units_in_order(summary: &DataFrame, units: &[ReportingUnit]) -> Result<Vec<String>> {
    if let Ok(column) = summary.column(BIN) {
        return Ok(column.str()?.into_iter().map(|b| b.unwrap_or_default().to_string()).collect());
    }
    let mut keys: Vec<String> = units.iter().map(|u| u.key.clone()).collect();
    keys.sort();
    anyhow::ensure!(keys.len() == summary.height(), "summary has {} rows for {} units", summary.height(), keys.len());
    Ok(keys)
}
