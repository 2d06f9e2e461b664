use std::collections::BTreeMap;

use anyhow::{Context, Result};
use geoverlay::GeometryEngine;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{ReportingUnit, BIN, OVERLAP_HA};

/// Output column names.
pub mod cols {
    pub const LABEL: &str = "label";
    pub const UNIT_HA: &str = "unit_ha";
    pub const HABITAT_HA: &str = "habitat_ha";
    pub const HABITAT_KCAL: &str = "habitat_kcal";
    pub const HABITAT_PCT: &str = "habitat_pct";
    pub const PROTECTED_HA: &str = "protected_ha";
    pub const PROTECTED_KCAL: &str = "protected_kcal";
    pub const URBAN_HA: &str = "urban_ha";
    pub const AVAILABLE_HA: &str = "available_ha";
    pub const WT_MEAN_KCAL: &str = "wt_mean_kcal";

    pub fn surplus(metric: &str) -> String { format!("{metric}_surplus") }
    pub fn protect_kcal(metric: &str) -> String { format!("{metric}_protect_kcal") }
    pub fn restore_ha(metric: &str) -> String { format!("{metric}_restore_ha") }
    pub fn protect_ha(metric: &str) -> String { format!("{metric}_protect_ha") }
}

/// Per-unit tables produced by the aggregation stages, all keyed by `bin`.
#[derive(Debug, Clone)]
pub struct ComposeInputs {
    /// Areal aggregation of supply: `area_ha`, `avail_kcal`.
    pub supply: DataFrame,
    /// Energy-weighted demand: one column per metric.
    pub demand: DataFrame,
    /// Areal aggregation of protected land: `overlap_ha`.
    pub protected: DataFrame,
    /// Areal aggregation of protected habitat: `avail_kcal`.
    pub protected_energy: DataFrame,
    /// Areal aggregation of urban land: `overlap_ha`.
    pub urban: DataFrame,
    pub wt_mean: BTreeMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct ComposeOptions {
    pub metrics: Vec<String>,
    /// Clamp `available_ha` at 0 when urban and protected land exceed the unit.
    pub clamp_available_ha: bool,
    /// Weighted means at or below this produce NaN goals.
    pub wt_epsilon: f64,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self { metrics: Vec::new(), clamp_available_ha: true, wt_epsilon: 1e-9 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeReport {
    /// Units whose unit − urban − protected hectares came out negative.
    pub negative_available_ha: BTreeMap<String, f64>,
    /// Units with a goal left undefined (NaN) by a near-zero weighted mean.
    pub undefined_goals: Vec<String>,
}

/// `bin` plus `from` columns of `df` renamed to `to`.
fn pick(df: &DataFrame, renames: &[(&str, &str)]) -> Result<LazyFrame> {
    let mut exprs = vec![col(BIN)];
    for &(from, to) in renames {
        df.column(from).with_context(|| format!("aggregated table lacks column '{from}'"))?;
        exprs.push(col(from).cast(DataType::Float64).alias(to));
    }
    Ok(df.clone().lazy().select(exprs))
}

/// Left-join every table onto `base` by `bin` and replace missing values with 0.
///
/// Units no table mentions end up with zeros rather than nulls, so every unit
/// key keeps exactly one fully-populated row.
pub fn fill_missing_with_default(base: LazyFrame, tables: Vec<LazyFrame>, value_cols: &[String]) -> LazyFrame {
    tables.into_iter()
        .fold(base, |acc, table| acc.left_join(table, col(BIN), col(BIN)))
        .with_columns(value_cols.iter()
            .map(|c| col(c.as_str()).fill_null(lit(0.0)).alias(c.as_str()))
            .collect::<Vec<_>>())
}

fn positive(e: Expr) -> Expr {
    when(e.clone().gt(lit(0.0))).then(e).otherwise(lit(0.0))
}

/// Divide by the weighted mean, or NaN when it is near zero.
fn per_wt(numerator: Expr, eps: f64) -> Expr {
    when(col(cols::WT_MEAN_KCAL).gt(lit(eps)))
        .then(numerator / col(cols::WT_MEAN_KCAL))
        .otherwise(lit(f64::NAN))
}

/// Join the per-category tables onto the unit list and derive the balance metrics.
pub fn compose(engine: &dyn GeometryEngine, units: &[ReportingUnit], inputs: &ComposeInputs, options: &ComposeOptions) -> Result<(DataFrame, ComposeReport)> {
    let base = DataFrame::new(vec![
        Column::new(BIN.into(), units.iter().map(|u| u.key.as_str()).collect::<Vec<_>>()),
        Column::new(cols::LABEL.into(), units.iter().map(|u| u.label()).collect::<Vec<_>>()),
        Column::new(cols::UNIT_HA.into(), units.iter().map(|u| engine.area_hectares(&u.geometry)).collect::<Vec<_>>()),
    ])?;

    let wt = DataFrame::new(vec![
        Column::new(BIN.into(), inputs.wt_mean.keys().map(String::as_str).collect::<Vec<_>>()),
        Column::new(cols::WT_MEAN_KCAL.into(), inputs.wt_mean.values().copied().collect::<Vec<_>>()),
    ])?;

    let demand_renames: Vec<(&str, &str)> = options.metrics.iter().map(|m| (m.as_str(), m.as_str())).collect();
    let tables = vec![
        pick(&inputs.supply, &[(OVERLAP_HA, cols::HABITAT_HA), ("avail_kcal", cols::HABITAT_KCAL)])?,
        pick(&inputs.demand, &demand_renames)?,
        pick(&inputs.protected, &[(OVERLAP_HA, cols::PROTECTED_HA)])?,
        pick(&inputs.protected_energy, &[("avail_kcal", cols::PROTECTED_KCAL)])?,
        pick(&inputs.urban, &[(OVERLAP_HA, cols::URBAN_HA)])?,
        wt.lazy(),
    ];

    let mut value_cols: Vec<String> = [cols::HABITAT_HA, cols::HABITAT_KCAL, cols::PROTECTED_HA, cols::PROTECTED_KCAL, cols::URBAN_HA, cols::WT_MEAN_KCAL]
        .iter().map(|s| s.to_string()).collect();
    value_cols.extend(options.metrics.iter().cloned());

    let available = col(cols::UNIT_HA) - col(cols::URBAN_HA) - col(cols::PROTECTED_HA);
    let joined = fill_missing_with_default(base.lazy(), tables, &value_cols)
        .with_column(available.alias(cols::AVAILABLE_HA))
        .sort([BIN], SortMultipleOptions::default())
        .collect()?;

    let mut report = ComposeReport::default();
    let bins = joined.column(BIN)?.str()?;
    let available_ha = joined.column(cols::AVAILABLE_HA)?.f64()?;
    for (bin, ha) in bins.into_iter().zip(available_ha.into_iter()) {
        if let (Some(bin), Some(ha)) = (bin, ha) {
            if ha < 0.0 { report.negative_available_ha.insert(bin.to_string(), ha); }
        }
    }
    if !report.negative_available_ha.is_empty() {
        warn!(units = report.negative_available_ha.len(), clamped = options.clamp_available_ha,
            "urban plus protected hectares exceed unit hectares");
    }

    let mut derived = vec![
        when(col(cols::UNIT_HA).gt(lit(0.0)))
            .then(col(cols::HABITAT_HA) / col(cols::UNIT_HA) * lit(100.0))
            .otherwise(lit(0.0))
            .alias(cols::HABITAT_PCT),
    ];
    if options.clamp_available_ha {
        derived.push(positive(col(cols::AVAILABLE_HA)).alias(cols::AVAILABLE_HA));
    }
    for m in &options.metrics {
        let surplus = col(cols::HABITAT_KCAL) - col(m.as_str());
        let needed = positive(col(m.as_str()) - col(cols::PROTECTED_KCAL));
        derived.push(surplus.clone().alias(cols::surplus(m)));
        derived.push(needed.clone().alias(cols::protect_kcal(m)));
        derived.push(when(surplus.clone().lt(lit(0.0)))
            .then(per_wt(lit(0.0) - surplus, options.wt_epsilon))
            .otherwise(lit(0.0))
            .alias(cols::restore_ha(m)));
        derived.push(when(needed.clone().gt(lit(0.0)))
            .then(per_wt(needed, options.wt_epsilon))
            .otherwise(lit(0.0))
            .alias(cols::protect_ha(m)));
    }
    let out = joined.lazy().with_columns(derived).collect()?;

    for m in &options.metrics {
        for name in [cols::restore_ha(m), cols::protect_ha(m)] {
            let values = out.column(&name)?.f64()?;
            for (bin, v) in out.column(BIN)?.str()?.into_iter().zip(values.into_iter()) {
                if let (Some(bin), Some(v)) = (bin, v) {
                    if v.is_nan() && !report.undefined_goals.iter().any(|b| b == bin) {
                        report.undefined_goals.push(bin.to_string());
                    }
                }
            }
        }
    }
    if !report.undefined_goals.is_empty() {
        warn!(units = report.undefined_goals.len(), "goals undefined where weighted mean kcal/ha is ~0");
    }

    info!(units = out.height(), metrics = options.metrics.len(), "composed unit summary");
    Ok((out, report))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};
    use geoverlay::PlanarEngine;

    use super::*;

    /// A unit of `ha` hectares.
    fn unit(key: &str, ha: f64) -> ReportingUnit {
        let w = ha * 100.0;
        ReportingUnit::new(key, MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: w, y: 0.0), (x: w, y: 100.0), (x: 0.0, y: 100.0), (x: 0.0, y: 0.0)]]))
    }

    fn empty_areal(field: &str) -> DataFrame {
        DataFrame::new(vec![
            Column::new(BIN.into(), Vec::<&str>::new()),
            Column::new(field.into(), Vec::<f64>::new()),
        ]).unwrap()
    }

    fn get(df: &DataFrame, bin: &str, column: &str) -> f64 {
        let idx = df.column(BIN).unwrap().str().unwrap().into_iter().position(|b| b == Some(bin)).unwrap();
        df.column(column).unwrap().f64().unwrap().get(idx).unwrap()
    }

    fn inputs() -> ComposeInputs {
        ComposeInputs {
            supply: df!(BIN => ["A", "B"], OVERLAP_HA => [15.0, 1.0], "avail_kcal" => [600.0, 10.0]).unwrap(),
            demand: df!(BIN => ["A", "B"], "LTADemand" => [400.0, 100.0]).unwrap(),
            protected: df!(BIN => ["A"], OVERLAP_HA => [5.0]).unwrap(),
            protected_energy: df!(BIN => ["A"], "avail_kcal" => [250.0]).unwrap(),
            urban: empty_areal(OVERLAP_HA),
            wt_mean: BTreeMap::from([("A".to_string(), 45.0), ("B".to_string(), 10.0)]),
        }
    }

    fn options() -> ComposeOptions {
        ComposeOptions { metrics: vec!["LTADemand".into()], ..Default::default() }
    }

    #[test]
    fn surplus_and_goals() {
        let engine = PlanarEngine::default();
        let units = vec![unit("A", 100.0), unit("B", 10.0)];
        let (out, report) = compose(&engine, &units, &inputs(), &options()).unwrap();

        assert_eq!(out.height(), 2);
        assert_relative_eq!(get(&out, "A", "LTADemand_surplus"), 200.0);
        assert_relative_eq!(get(&out, "A", "LTADemand_restore_ha"), 0.0);
        assert_relative_eq!(get(&out, "A", "LTADemand_protect_kcal"), 150.0);
        assert_relative_eq!(get(&out, "A", "LTADemand_protect_ha"), 150.0 / 45.0, max_relative = 1e-12);
        assert_relative_eq!(get(&out, "A", cols::AVAILABLE_HA), 95.0);
        assert_relative_eq!(get(&out, "A", cols::HABITAT_PCT), 15.0, max_relative = 1e-12);

        // Deficit of 90 kcal at 10 kcal/ha needs 9 ha restored.
        assert_relative_eq!(get(&out, "B", "LTADemand_surplus"), -90.0);
        assert_relative_eq!(get(&out, "B", "LTADemand_restore_ha"), 9.0, max_relative = 1e-12);
        assert_relative_eq!(get(&out, "B", cols::PROTECTED_HA), 0.0);
        assert!(report.undefined_goals.is_empty());
    }

    #[test]
    fn units_missing_everywhere_get_zero_rows() {
        let engine = PlanarEngine::default();
        let units = vec![unit("A", 100.0), unit("B", 10.0), unit("C", 1.0)];
        let (out, report) = compose(&engine, &units, &inputs(), &options()).unwrap();

        assert_eq!(out.height(), 3);
        for column in [cols::HABITAT_KCAL, cols::URBAN_HA, cols::WT_MEAN_KCAL, "LTADemand", "LTADemand_restore_ha"] {
            assert_eq!(get(&out, "C", column), 0.0, "{column}");
        }
        assert_eq!(out.column(cols::LABEL).unwrap().str().unwrap().get(2), Some("C"));
        assert!(report.negative_available_ha.is_empty());
    }

    #[test]
    fn near_zero_weighted_mean_gives_nan_goal() {
        let engine = PlanarEngine::default();
        let mut inputs = inputs();
        inputs.wt_mean.insert("B".into(), 0.0);
        let (out, report) = compose(&engine, &[unit("A", 100.0), unit("B", 10.0)], &inputs, &options()).unwrap();

        assert!(get(&out, "B", "LTADemand_restore_ha").is_nan());
        assert!(get(&out, "B", "LTADemand_protect_ha").is_nan());
        assert_eq!(report.undefined_goals, vec!["B".to_string()]);
    }

    #[test]
    fn negative_available_is_clamped_and_reported() {
        let engine = PlanarEngine::default();
        let mut inputs = inputs();
        inputs.urban = df!(BIN => ["B"], OVERLAP_HA => [12.0]).unwrap();
        let units = [unit("A", 100.0), unit("B", 10.0)];

        let (out, report) = compose(&engine, &units, &inputs, &options()).unwrap();
        assert_eq!(get(&out, "B", cols::AVAILABLE_HA), 0.0);
        assert_relative_eq!(report.negative_available_ha["B"], -2.0, max_relative = 1e-9);

        let raw = ComposeOptions { clamp_available_ha: false, ..options() };
        let (out, _) = compose(&engine, &units, &inputs, &raw).unwrap();
        assert_relative_eq!(get(&out, "B", cols::AVAILABLE_HA), -2.0, max_relative = 1e-9);
    }

    #[test]
    fn fill_missing_with_default_fills_zero() {
        let base = df!(BIN => ["A", "B"]).unwrap().lazy();
        let table = df!(BIN => ["B"], "x" => [2.0]).unwrap().lazy();
        let out = fill_missing_with_default(base, vec![table], &["x".to_string()])
            .sort([BIN], SortMultipleOptions::default())
            .collect().unwrap();
        let x: Vec<_> = out.column("x").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(x, vec![Some(0.0), Some(2.0)]);
    }
}
