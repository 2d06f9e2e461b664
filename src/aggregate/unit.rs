use std::collections::HashSet;

use anyhow::Result;
use geo::MultiPolygon;

use crate::{io::Layer, ModelError};

/// A reporting unit ("bin"): the key every result row is keyed by.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingUnit {
    pub key: String,
    pub name: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

impl ReportingUnit {
    pub fn new(key: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self { key: key.into(), name: None, geometry }
    }

    /// Display label: the name when known, else the key.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    /// Units from `layer`, keyed by `key_field`. Keys must be present and unique.
    pub fn from_layer(layer: &Layer, key_field: &str, name_field: Option<&str>) -> Result<Vec<Self>> {
        layer.require_field(key_field)?;
        if let Some(name) = name_field { layer.require_field(name)? }

        let mut seen = HashSet::with_capacity(layer.len());
        layer.features.iter().enumerate()
            .map(|(i, f)| -> Result<Self> {
                let key = f.text(key_field).ok_or_else(|| ModelError::config(format!(
                    "reporting unit {i} in '{}' has no value for key field '{key_field}'", layer.name)))?;
                if !seen.insert(key.clone()) {
                    return Err(ModelError::config(format!("duplicate reporting unit key '{key}' in '{}'", layer.name)).into());
                }
                Ok(Self {
                    key,
                    name: name_field.and_then(|n| f.text(n)),
                    geometry: f.geometry.clone(),
                })
            })
            .collect()
    }
}

pub(crate) fn unit_geometries(units: &[ReportingUnit]) -> Vec<MultiPolygon<f64>> {
    units.iter().map(|u| u.geometry.clone()).collect()
}
