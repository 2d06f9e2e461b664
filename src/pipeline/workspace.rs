use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geoverlay::Crs;
use polars::frame::DataFrame;

use crate::{
    common::{ensure_dir_exists, write_atomic},
    habitat::HabitatPolygon,
    io::{csv, geojson, Feature},
    protected::ProtectedLand,
};

/// Scratch directory of one pipeline run: stage artifacts plus `manifest.json`.
///
/// Every path handed out is relative to the root so the manifest stays valid
/// when a workspace is moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
    crs: Crs,
}

impl Workspace {
    pub const MANIFEST: &'static str = "manifest.json";

    /// Open (creating if needed) the workspace at `root`; artifacts are written in `crs`.
    pub fn open(root: &Path, crs: Crs) -> Result<Self> {
        ensure_dir_exists(root)?;
        Ok(Self { root: root.to_path_buf(), crs })
    }

    #[inline] pub fn root(&self) -> &Path { &self.root }

    #[inline] pub fn crs(&self) -> &Crs { &self.crs }

    #[inline] pub fn path(&self, rel: &str) -> PathBuf { self.root.join(rel) }

    pub fn exists(&self, rel: &str) -> bool { self.path(rel).is_file() }

    pub fn write(&self, rel: &str, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.path(rel), bytes)
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.path(rel);
        std::fs::read(&path).with_context(|| format!("Failed to read checkpoint {}", path.display()))
    }

    fn write_features(&self, rel: &str, features: &[Feature]) -> Result<()> {
        self.write(rel, &geojson::write_geojson_bytes(features, Some(&self.crs))?)
    }

    fn read_features(&self, rel: &str) -> Result<Vec<Feature>> {
        Ok(geojson::read_geojson_bytes(rel, &self.read(rel)?)?.features)
    }

    pub fn write_habitat(&self, rel: &str, polygons: &[HabitatPolygon]) -> Result<()> {
        self.write_features(rel, &polygons.iter().map(HabitatPolygon::to_feature).collect::<Vec<_>>())
    }

    pub fn read_habitat(&self, rel: &str) -> Result<Vec<HabitatPolygon>> {
        Ok(self.read_features(rel)?.iter().map(HabitatPolygon::from_feature).collect())
    }

    pub fn write_protected(&self, rel: &str, lands: &[ProtectedLand]) -> Result<()> {
        self.write_features(rel, &lands.iter().map(ProtectedLand::to_feature).collect::<Vec<_>>())
    }

    pub fn read_protected(&self, rel: &str) -> Result<Vec<ProtectedLand>> {
        Ok(self.read_features(rel)?.iter().map(ProtectedLand::from_feature).collect())
    }

    pub fn write_table(&self, rel: &str, df: &DataFrame) -> Result<()> {
        csv::write_csv(&self.path(rel), df)
    }

    /// Read a table written by [`Self::write_table`], keeping `key` as strings.
    pub fn read_table(&self, rel: &str, key: &str) -> Result<DataFrame> {
        csv::read_table(&self.path(rel), key)
    }
}

#[cfg(test)]
mod tests {
    use geo::{polygon, MultiPolygon};

    use super::*;

    #[test]
    fn habitat_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(&dir.path().join("ws"), Crs::albers_conus()).unwrap();

        let square = MultiPolygon::new(vec![polygon![(x: 0.0, y: 0.0), (x: 100.0, y: 0.0), (x: 100.0, y: 100.0), (x: 0.0, y: 100.0), (x: 0.0, y: 0.0)]]);
        let mut marsh = HabitatPolygon::new(3, "nwi", Some("PEM1C"), square);
        marsh.class = Some("FreshMarsh".into());
        marsh.area_ha = 1.0;
        marsh.kcal_per_ha = Some(50.0);
        marsh.avail_kcal = Some(50.0);

        ws.write_habitat("supply.geojson", &[marsh.clone()]).unwrap();
        assert!(ws.exists("supply.geojson"));
        assert_eq!(ws.read_habitat("supply.geojson").unwrap(), vec![marsh]);
    }

    #[test]
    fn reading_a_missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::open(dir.path(), Crs::albers_conus()).unwrap();
        assert!(ws.read("nope.csv").is_err());
    }
}
