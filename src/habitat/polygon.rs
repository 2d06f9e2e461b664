use geo::MultiPolygon;

use crate::io::{Feature, Layer};

/// A habitat feature moving through classification and energy calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct HabitatPolygon {
    pub id: usize,
    /// Name of the layer the polygon came from.
    pub source: String,
    pub raw_class: Option<String>,
    /// Normalized habitat class; set at most once.
    pub class: Option<String>,
    pub area_ha: f64,
    pub kcal_per_ha: Option<f64>,
    pub avail_kcal: Option<f64>,
    pub geometry: MultiPolygon<f64>,
}

impl HabitatPolygon {
    pub fn new(id: usize, source: &str, raw_class: Option<&str>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            id,
            source: source.to_string(),
            raw_class: raw_class.map(str::to_string),
            class: None,
            area_ha: 0.0,
            kcal_per_ha: None,
            avail_kcal: None,
            geometry,
        }
    }

    /// Class when set and not blank.
    #[inline]
    pub fn class(&self) -> Option<&str> {
        self.class.as_deref().filter(|c| !c.trim().is_empty())
    }

    /// Available energy, 0 when unknown.
    #[inline]
    pub fn energy(&self) -> f64 { self.avail_kcal.unwrap_or(0.0) }

    /// Raw polygons from `layer`, reading the raw class code from `field`.
    /// Classes come only from the crosswalk; a `class` attribute on the input is ignored.
    pub fn from_layer(layer: &Layer, field: &str) -> Vec<Self> {
        layer.features.iter().enumerate()
            .map(|(id, f)| Self::new(id, &layer.name, f.text(field).as_deref(), f.geometry.clone()))
            .collect()
    }

    pub(crate) fn to_feature(&self) -> Feature {
        Feature::new(self.geometry.clone())
            .with(keys::ID, self.id)
            .with(keys::SOURCE, self.source.as_str())
            .with(keys::RAW_CLASS, self.raw_class.clone())
            .with(keys::CLASS, self.class.clone())
            .with(keys::AREA_HA, self.area_ha)
            .with(keys::KCAL_PER_HA, self.kcal_per_ha)
            .with(keys::AVAIL_KCAL, self.avail_kcal)
    }

    pub(crate) fn from_feature(feature: &Feature) -> Self {
        Self {
            id: feature.number(keys::ID).map_or(0, |n| n as usize),
            source: feature.text(keys::SOURCE).unwrap_or_default(),
            raw_class: feature.text(keys::RAW_CLASS),
            class: feature.text(keys::CLASS),
            area_ha: feature.number(keys::AREA_HA).unwrap_or(0.0),
            kcal_per_ha: feature.number(keys::KCAL_PER_HA),
            avail_kcal: feature.number(keys::AVAIL_KCAL),
            geometry: feature.geometry.clone(),
        }
    }
}

/// Attribute names used when habitat polygons are written to disk.
pub(crate) mod keys {
    pub const ID: &str = "id";
    pub const SOURCE: &str = "source";
    pub const RAW_CLASS: &str = "raw_class";
    pub const CLASS: &str = "class";
    pub const AREA_HA: &str = "area_ha";
    pub const KCAL_PER_HA: &str = "kcal_per_ha";
    pub const AVAIL_KCAL: &str = "avail_kcal";
}
