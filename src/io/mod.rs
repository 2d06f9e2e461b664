//! Format-specific reading and writing.
//!
//! - `shp` - ESRI Shapefile polygon layers (DBF attributes, `.prj` CRS sniffing)
//! - `geojson` - GeoJSON layers, also the format of checkpointed layers
//! - `csv` - tabular inputs and checkpointed tables (polars)
//! - `layer` - the format-neutral [`Layer`] and the load/reproject/clip path

pub(crate) mod csv;
pub(crate) mod geojson;
mod layer;
mod shp;

pub use layer::{load_layer, read_layer, Feature, Layer};
