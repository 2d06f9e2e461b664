use anyhow::Result;
use geoverlay::PlanarEngine;

use crate::{cli::{Cli, RunArgs}, pipeline::run_model, ModelConfig};

/// The configuration file (or defaults) with every given flag applied on top.
pub fn config(args: &RunArgs) -> Result<ModelConfig> {
    let mut cfg = match &args.config {
        Some(path) => ModelConfig::from_path(path)?,
        None => ModelConfig::default(),
    };

    macro_rules! set {
        ($($field:ident),+) => { $( if let Some(v) = &args.$field { cfg.$field = v.clone(); } )+ };
    }
    macro_rules! set_some {
        ($($field:ident),+) => { $( if let Some(v) = &args.$field { cfg.$field = Some(v.clone()); } )+ };
    }
    macro_rules! set_list {
        ($($field:ident),+) => { $( if !args.$field.is_empty() { cfg.$field = args.$field.clone(); } )+ };
    }

    set!(workspace, output, unit_key, habitat_field, kcal_units, admin_key, target_crs, stages, jobs);
    set_some!(aoi, aoi_key, units, unit_name, wetland, crosswalk, kcal, demand, species_field, species, urban, source_crs, field_map);
    set_list!(extras, extra_crosswalks, extra_fields, metrics, protected);
    if args.no_clamp { cfg.clamp_available_ha = false }

    Ok(cfg)
}

pub fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let cfg = config(args)?;
    if cli.verbose > 1 {
        eprintln!("[run] workspace={} output={}", cfg.workspace.display(), cfg.output.display());
    }

    let outcomes = run_model(&PlanarEngine::default(), &cfg)?;
    for outcome in &outcomes {
        let clean = if outcome.diagnostics.is_clean() { "" } else { " (see diagnostics.json)" };
        println!("{}: {} units -> {}{clean}", outcome.aoi, outcome.rows.len(), outcome.output.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{habitat::AreaUnit, pipeline::Stage};

    #[test]
    fn flags_override_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"workspace": "ws", "metrics": ["LTADemand", "X80Demand"], "jobs": 4}"#).unwrap();

        let args = RunArgs {
            config: Some(path),
            workspace: Some("elsewhere".into()),
            kcal_units: Some(AreaUnit::Acre),
            protected: vec!["padus.shp".into(), "nced.shp".into()],
            stages: Some("1111110".parse().unwrap()),
            no_clamp: true,
            ..RunArgs::default()
        };
        let cfg = config(&args).unwrap();

        assert_eq!(cfg.workspace, PathBuf::from("elsewhere"));
        assert_eq!(cfg.metrics, vec!["LTADemand", "X80Demand"]);
        assert_eq!(cfg.jobs, 4);
        assert_eq!(cfg.kcal_units, AreaUnit::Acre);
        assert_eq!(cfg.protected.len(), 2);
        assert!(!cfg.stages.is_enabled(Stage::WeightedMean));
        assert!(!cfg.clamp_available_ha);
    }

    #[test]
    fn missing_config_file_is_a_config_error() {
        let args = RunArgs { config: Some("/nonexistent/run.json".into()), ..RunArgs::default() };
        assert!(crate::is_config_error(&config(&args).unwrap_err()));
    }
}
