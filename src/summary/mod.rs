//! Per-unit summary: energy-weighted mean density, the joined output table and its renames.

mod compose;
mod record;
mod rename;
mod weighted;

pub use compose::{cols, compose, fill_missing_with_default, ComposeInputs, ComposeOptions, ComposeReport};
pub use record::{DemandBalance, UnitSummary};
pub use rename::{FieldMap, FieldRename};
pub use weighted::{class_shares, weighted_mean, ClassShare};
