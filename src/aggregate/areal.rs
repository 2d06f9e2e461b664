use anyhow::{ensure, Result};
use geo::{Area, MultiPolygon};
use geoverlay::{GeometryEngine, M2_PER_HA};
use polars::prelude::*;
use tracing::debug;

use super::{dissolve_by, unit::unit_geometries, ReportingUnit, Stat, BIN, OVERLAP_HA};
use crate::ModelError;

fn is_numeric(dtype: &DataType) -> bool {
    matches!(dtype,
        DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 |
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 |
        DataType::Float32 | DataType::Float64)
}

/// Numeric columns of `df` as `f64` vectors, skipping reserved output names.
fn value_columns(df: &DataFrame) -> Result<Vec<(PlSmallStr, Vec<Option<f64>>)>> {
    df.get_columns().iter()
        .filter(|c| is_numeric(c.dtype()) && c.name() != BIN && c.name() != OVERLAP_HA)
        .map(|c| -> Result<(PlSmallStr, Vec<Option<f64>>)> {
            let values = c.cast(&DataType::Float64)?.f64()?.into_iter().collect();
            Ok((c.name().clone(), values))
        })
        .collect()
}

/// Redistribute numeric fields of data polygons onto reporting units by overlap area.
///
/// Units and data are fully overlaid. Each fragment carries its data parent's
/// values scaled by `fragment area / parent area`, so a polygon split 60/40
/// between two units contributes 60 % and 40 % of its value. Fragments are then
/// dissolved by unit key with `stat`, together with `overlap_ha`, the area of
/// the fragments carrying data. Fragments outside every unit, and unit area
/// without data, contribute nothing. Units without data get no row.
pub fn aggregate_by_area(
    engine: &dyn GeometryEngine,
    units: &[ReportingUnit],
    data_geoms: &[MultiPolygon<f64>],
    data_fields: &DataFrame,
    stat: Stat,
) -> Result<DataFrame> {
    ensure!(data_fields.height() == data_geoms.len(),
        "data table has {} rows but there are {} data polygons", data_fields.height(), data_geoms.len());

    let unit_geoms = unit_geometries(units);
    let fragments = engine.union(&[&unit_geoms, data_geoms])
        .map_err(|e| ModelError::geometry("areal aggregation", e))?;
    let parent_area: Vec<f64> = data_geoms.iter().map(|g| g.unsigned_area()).collect();
    let fields = value_columns(data_fields)?;

    let mut bins: Vec<&str> = Vec::new();
    let mut overlap: Vec<f64> = Vec::new();
    let mut prorated: Vec<Vec<Option<f64>>> = vec![Vec::new(); fields.len()];

    for fragment in &fragments {
        let (Some(u), Some(d)) = (fragment.parent(0), fragment.parent(1)) else { continue };
        let ratio = if parent_area[d] > 0.0 { fragment.area / parent_area[d] } else { 0.0 };

        bins.push(&units[u].key);
        overlap.push(fragment.area / M2_PER_HA);
        for ((_, values), out) in fields.iter().zip(prorated.iter_mut()) {
            out.push(values[d].map(|v| v * ratio));
        }
    }
    debug!(fragments = fragments.len(), kept = bins.len(), "areal overlay");

    let mut columns = vec![Column::new(BIN.into(), bins)];
    columns.extend(fields.iter().zip(prorated).map(|((name, _), values)| Column::new(name.clone(), values)));
    columns.push(Column::new(OVERLAP_HA.into(), overlap));

    dissolve_by(&DataFrame::new(columns)?, BIN, stat)
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::polygon;
    use geoverlay::PlanarEngine;

    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1), (x: x0, y: y0)]])
    }

    fn units() -> Vec<ReportingUnit> {
        vec![
            ReportingUnit::new("A", rect(0.0, 0.0, 1000.0, 1000.0)),
            ReportingUnit::new("B", rect(1000.0, 0.0, 2000.0, 1000.0)),
            ReportingUnit::new("C", rect(5000.0, 0.0, 6000.0, 1000.0)),
        ]
    }

    fn value(df: &DataFrame, bin: &str, field: &str) -> Option<f64> {
        let bins = df.column(BIN).unwrap().str().unwrap();
        let idx = bins.into_iter().position(|b| b == Some(bin))?;
        df.column(field).unwrap().f64().unwrap().get(idx)
    }

    #[test]
    fn contained_polygon_gives_full_value() {
        let engine = PlanarEngine::default();
        let data = vec![rect(100.0, 100.0, 200.0, 200.0)];
        let fields = df!("kcal" => [500.0]).unwrap();

        let out = aggregate_by_area(&engine, &units(), &data, &fields, Stat::Sum).unwrap();
        assert_eq!(out.height(), 1);
        assert_relative_eq!(value(&out, "A", "kcal").unwrap(), 500.0, max_relative = 1e-9);
        assert_relative_eq!(value(&out, "A", OVERLAP_HA).unwrap(), 1.0, max_relative = 1e-9);
    }

    #[test]
    fn straddling_polygon_splits_sixty_forty() {
        let engine = PlanarEngine::default();
        // 400..1400 m wide strip: 600 m in A, 400 m in B.
        let data = vec![rect(400.0, 0.0, 1400.0, 100.0)];
        let fields = df!("kcal" => [1000.0], "area_ha" => [10i64]).unwrap();

        let out = aggregate_by_area(&engine, &units(), &data, &fields, Stat::Sum).unwrap();
        let a = value(&out, "A", "kcal").unwrap();
        let b = value(&out, "B", "kcal").unwrap();
        assert_relative_eq!(a, 600.0, max_relative = 1e-6);
        assert_relative_eq!(b, 400.0, max_relative = 1e-6);
        assert_relative_eq!(a + b, 1000.0, max_relative = 1e-9);
        assert_relative_eq!(value(&out, "B", "area_ha").unwrap(), 4.0, max_relative = 1e-6);
        assert_eq!(value(&out, "C", "kcal"), None);
    }

    #[test]
    fn area_outside_units_is_dropped() {
        let engine = PlanarEngine::default();
        let data = vec![rect(1500.0, 0.0, 2500.0, 100.0)];
        let fields = df!("kcal" => [100.0]).unwrap();

        let out = aggregate_by_area(&engine, &units(), &data, &fields, Stat::Sum).unwrap();
        assert_relative_eq!(value(&out, "B", "kcal").unwrap(), 50.0, max_relative = 1e-6);
        assert_relative_eq!(value(&out, "B", OVERLAP_HA).unwrap(), 5.0, max_relative = 1e-6);
    }

    #[test]
    fn null_values_and_text_columns() {
        let engine = PlanarEngine::default();
        let data = vec![rect(0.0, 0.0, 10.0, 10.0), rect(20.0, 0.0, 30.0, 10.0)];
        let fields = df!("kcal" => [Some(5.0), None], "class" => ["Marsh", "Forest"]).unwrap();

        let out = aggregate_by_area(&engine, &units(), &data, &fields, Stat::Sum).unwrap();
        assert!(out.column("class").is_err());
        assert_relative_eq!(value(&out, "A", "kcal").unwrap(), 5.0, max_relative = 1e-9);
    }

    #[test]
    fn row_count_mismatch_is_an_error() {
        let engine = PlanarEngine::default();
        let fields = df!("kcal" => [1.0, 2.0]).unwrap();
        assert!(aggregate_by_area(&engine, &units(), &[rect(0.0, 0.0, 1.0, 1.0)], &fields, Stat::Sum).is_err());
    }
}
