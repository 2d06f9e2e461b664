use std::collections::BTreeMap;

use anyhow::Result;
use geo::{Area, MultiPolygon};
use geoverlay::GeometryEngine;
use polars::prelude::*;
use tracing::{debug, info};

use super::{dissolve_by, unit::unit_geometries, DemandLayer, ReportingUnit, Stat, BIN};
use crate::{habitat::HabitatPolygon, AllocationError, ModelError};

const ADMIN: &str = "admin";
const JOIN_KEY: &str = "join_key";
const PAIR_KCAL: &str = "pair_kcal";
const ADMIN_KCAL: &str = "admin_kcal";
const PROPORTION: &str = "proportion";

/// Compound key of a (reporting unit, admin unit) pair.
pub fn join_key(unit: &str, admin: &str) -> String {
    format!("{unit}:{admin}")
}

/// Available energy of `supply` per (unit key, admin key) pair, prorated by fragment area.
pub fn energy_pairs(
    engine: &dyn GeometryEngine,
    units: &[ReportingUnit],
    supply: &[HabitatPolygon],
    admin_keys: &[String],
    admin_geoms: &[MultiPolygon<f64>],
) -> Result<BTreeMap<(String, String), f64>> {
    let supply_geoms: Vec<MultiPolygon<f64>> = supply.iter().map(|p| p.geometry.clone()).collect();
    let supply_area: Vec<f64> = supply_geoms.iter().map(|g| g.unsigned_area()).collect();
    let unit_geoms = unit_geometries(units);

    let fragments = engine.intersect(&[&supply_geoms, &unit_geoms, admin_geoms])
        .map_err(|e| ModelError::geometry("energy allocation", e))?;

    let mut pairs: BTreeMap<(String, String), f64> = BTreeMap::new();
    for fragment in &fragments {
        let (Some(s), Some(u), Some(a)) = (fragment.parent(0), fragment.parent(1), fragment.parent(2)) else { continue };
        let share = if supply_area[s] > 0.0 { fragment.area / supply_area[s] } else { 0.0 };
        *pairs.entry((units[u].key.clone(), admin_keys[a].clone())).or_default() += supply[s].energy() * share;
    }
    debug!(fragments = fragments.len(), pairs = pairs.len(), "supply x units x admin overlay");
    Ok(pairs)
}

/// Distribute admin-level demand onto reporting units in proportion to available energy.
///
/// For every (unit, admin) pair the share of the admin's total supply energy
/// lying in the unit is the pair's proportion; each admin metric is multiplied
/// by it and the results are summed per unit. The prorated metrics of one admin
/// unit sum back to its original demand.
///
/// An admin unit with non-zero demand fails with [`AllocationError::MissingJoin`]
/// when no supply falls in any (unit, admin) pair, and with
/// [`AllocationError::ZeroEnergy`] when its pairs carry no energy.
pub fn aggregate_by_energy(
    engine: &dyn GeometryEngine,
    units: &[ReportingUnit],
    supply: &[HabitatPolygon],
    demand: &DemandLayer,
) -> Result<DataFrame> {
    let (admin_keys, admin_geoms) = demand.admin_footprints(engine)?;
    let pairs = energy_pairs(engine, units, supply, &admin_keys, &admin_geoms)?;

    let mut admin_kcal: BTreeMap<&str, f64> = BTreeMap::new();
    for ((_, admin), kcal) in &pairs {
        *admin_kcal.entry(admin.as_str()).or_default() += kcal;
    }

    let demand_totals = demand.admin_totals();
    for (admin, metrics) in &demand_totals {
        let Some(&demand) = metrics.iter().find(|v| **v != 0.0) else { continue };
        match admin_kcal.get(admin.as_str()) {
            None => return Err(ModelError::from(AllocationError::MissingJoin { admin: admin.clone(), demand }).into()),
            Some(&kcal) if kcal <= 0.0 => return Err(ModelError::from(AllocationError::ZeroEnergy { admin: admin.clone(), demand }).into()),
            Some(_) => {}
        }
    }

    let pairs_df = DataFrame::new(vec![
        Column::new(JOIN_KEY.into(), pairs.keys().map(|(u, a)| join_key(u, a)).collect::<Vec<_>>()),
        Column::new(BIN.into(), pairs.keys().map(|(u, _)| u.as_str()).collect::<Vec<_>>()),
        Column::new(ADMIN.into(), pairs.keys().map(|(_, a)| a.as_str()).collect::<Vec<_>>()),
        Column::new(PAIR_KCAL.into(), pairs.values().copied().collect::<Vec<_>>()),
    ])?;
    let totals_df = DataFrame::new(vec![
        Column::new(ADMIN.into(), admin_kcal.keys().copied().collect::<Vec<_>>()),
        Column::new(ADMIN_KCAL.into(), admin_kcal.values().copied().collect::<Vec<_>>()),
    ])?;
    let mut demand_cols = vec![Column::new(ADMIN.into(), demand_totals.keys().map(String::as_str).collect::<Vec<_>>())];
    for (j, metric) in demand.metrics.iter().enumerate() {
        demand_cols.push(Column::new(metric.as_str().into(), demand_totals.values().map(|m| m[j]).collect::<Vec<_>>()));
    }
    let demand_df = DataFrame::new(demand_cols)?;

    let proportions = pairs_df.clone().lazy()
        .inner_join(totals_df.lazy(), col(ADMIN), col(ADMIN))
        .select([
            col(JOIN_KEY),
            when(col(ADMIN_KCAL).gt(lit(0.0)))
                .then(col(PAIR_KCAL) / col(ADMIN_KCAL))
                .otherwise(lit(0.0))
                .alias(PROPORTION),
        ]);

    let mut prorated = vec![col(BIN)];
    prorated.extend(demand.metrics.iter().map(|m| (col(m.as_str()) * col(PROPORTION)).alias(m.as_str())));

    let allocated = pairs_df.lazy()
        .select([col(JOIN_KEY), col(BIN), col(ADMIN)])
        .inner_join(demand_df.lazy(), col(ADMIN), col(ADMIN))
        .left_join(proportions, col(JOIN_KEY), col(JOIN_KEY))
        .select(prorated)
        .collect()?;

    let out = dissolve_by(&allocated, BIN, Stat::Sum)?;
    info!(units = out.height(), admins = demand_totals.len(), "allocated demand by energy");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::polygon;
    use geoverlay::PlanarEngine;

    use super::*;
    use crate::aggregate::DemandPolygon;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)]])
    }

    fn habitat(id: usize, geometry: MultiPolygon<f64>, kcal: Option<f64>) -> HabitatPolygon {
        HabitatPolygon { avail_kcal: kcal, ..HabitatPolygon::new(id, "nwi", None, geometry) }
    }

    fn demand(rows: &[(&str, f64, MultiPolygon<f64>)]) -> DemandLayer {
        DemandLayer {
            metrics: vec!["LTADemand".into()],
            polygons: rows.iter()
                .map(|(admin, v, g)| DemandPolygon { admin_key: admin.to_string(), species: None, metrics: vec![*v], geometry: g.clone() })
                .collect(),
        }
    }

    fn units() -> Vec<ReportingUnit> {
        vec![
            ReportingUnit::new("A", rect(0.0, 0.0, 100.0, 100.0)),
            ReportingUnit::new("B", rect(100.0, 0.0, 200.0, 100.0)),
        ]
    }

    fn metric(df: &DataFrame, bin: &str) -> f64 {
        let bins = df.column(BIN).unwrap().str().unwrap();
        let idx = bins.into_iter().position(|b| b == Some(bin)).unwrap();
        df.column("LTADemand").unwrap().f64().unwrap().get(idx).unwrap()
    }

    #[test]
    fn demand_follows_energy_and_is_conserved() {
        let engine = PlanarEngine::default();
        // 300 kcal in A, 100 kcal in B, one admin unit over both.
        let supply = vec![
            habitat(0, rect(0.0, 0.0, 30.0, 10.0), Some(300.0)),
            habitat(1, rect(150.0, 0.0, 160.0, 10.0), Some(100.0)),
        ];
        let layer = demand(&[("17001", 1000.0, rect(0.0, 0.0, 200.0, 100.0))]);

        let out = aggregate_by_energy(&engine, &units(), &supply, &layer).unwrap();
        assert_relative_eq!(metric(&out, "A"), 750.0, max_relative = 1e-9);
        assert_relative_eq!(metric(&out, "B"), 250.0, max_relative = 1e-9);
        assert_relative_eq!(metric(&out, "A") + metric(&out, "B"), 1000.0, max_relative = 1e-12);
    }

    #[test]
    fn straddling_supply_is_prorated_by_area() {
        let engine = PlanarEngine::default();
        // One polygon 60/40 across A and B, admin covers both.
        let supply = vec![habitat(0, rect(40.0, 0.0, 140.0, 10.0), Some(500.0))];
        let layer = demand(&[("17001", 100.0, rect(0.0, 0.0, 200.0, 100.0))]);

        let out = aggregate_by_energy(&engine, &units(), &supply, &layer).unwrap();
        assert_relative_eq!(metric(&out, "A"), 60.0, max_relative = 1e-6);
        assert_relative_eq!(metric(&out, "B"), 40.0, max_relative = 1e-6);
    }

    #[test]
    fn admin_without_supply_is_missing_join() {
        let engine = PlanarEngine::default();
        let supply = vec![habitat(0, rect(0.0, 0.0, 10.0, 10.0), Some(10.0))];
        let layer = demand(&[
            ("17001", 5.0, rect(0.0, 0.0, 50.0, 100.0)),
            ("17003", 5.0, rect(150.0, 0.0, 200.0, 100.0)),
        ]);

        let err = aggregate_by_energy(&engine, &units(), &supply, &layer).unwrap_err();
        assert!(matches!(err.downcast_ref::<ModelError>(),
            Some(ModelError::Allocation(AllocationError::MissingJoin { admin, .. })) if admin == "17003"));
    }

    #[test]
    fn admin_with_only_zero_energy_is_an_error() {
        let engine = PlanarEngine::default();
        let supply = vec![habitat(0, rect(0.0, 0.0, 10.0, 10.0), None)];
        let layer = demand(&[("17001", 5.0, rect(0.0, 0.0, 50.0, 100.0))]);

        let err = aggregate_by_energy(&engine, &units(), &supply, &layer).unwrap_err();
        assert!(matches!(err.downcast_ref::<ModelError>(),
            Some(ModelError::Allocation(AllocationError::ZeroEnergy { .. }))));
    }

    #[test]
    fn zero_demand_without_energy_is_fine() {
        let engine = PlanarEngine::default();
        let supply = vec![habitat(0, rect(0.0, 0.0, 10.0, 10.0), Some(10.0))];
        let layer = demand(&[
            ("17001", 8.0, rect(0.0, 0.0, 50.0, 100.0)),
            ("17003", 0.0, rect(150.0, 0.0, 200.0, 100.0)),
        ]);

        let out = aggregate_by_energy(&engine, &units(), &supply, &layer).unwrap();
        assert_eq!(out.height(), 1);
        assert_relative_eq!(metric(&out, "A"), 8.0, max_relative = 1e-12);
    }
}
