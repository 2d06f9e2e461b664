//! Apportionment of polygon attributes onto reporting units.
//!
//! Aggregated tables are polars frames keyed by the string column [`BIN`].

mod areal;
mod demand;
mod dissolve;
mod field;
mod unit;

pub use areal::aggregate_by_area;
pub use demand::{DemandLayer, DemandPolygon};
pub use dissolve::{dissolve_by, Stat};
pub use field::{aggregate_by_energy, energy_pairs, join_key};
pub use unit::ReportingUnit;
pub(crate) use unit::unit_geometries;

/// Reporting-unit key column of every aggregated table.
pub const BIN: &str = "bin";

/// Hectares of overlap between a unit and the aggregated data.
pub const OVERLAP_HA: &str = "overlap_ha";
