mod crosswalk;
mod energy;
mod polygon;
mod supply;

pub use crosswalk::{classify, ClassifyReport, Crosswalk, Unmatched};
pub use energy::{apply_energy, AreaUnit, EnergyReport, EnergyTable, ACRES_PER_HA};
pub use polygon::HabitatPolygon;
pub(crate) use polygon::keys;
pub use supply::{assemble_supply, total_area_ha, total_kcal};
