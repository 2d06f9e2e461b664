use std::path::Path;

use anyhow::{Context, Result};
use polars::prelude::*;
use tracing::debug;

use crate::{io::csv::read_csv_text_bytes, ModelError};

const FROM: &str = "original_field_name";
const TO: &str = "field_name";
const SPECIES: &str = "species";

/// Species tag that applies a rename to every run.
const ALL: &str = "ALL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRename {
    pub from: String,
    pub to: String,
    pub species: Option<String>,
}

/// Output column renames, read from `original_field_name,field_name[,species]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    renames: Vec<FieldRename>,
}

impl FieldMap {
    pub fn new(renames: Vec<FieldRename>) -> Self { Self { renames } }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| ModelError::config(format!("field map {}: {e}", path.display())))?;
        Self::from_csv_bytes(&bytes).with_context(|| format!("Failed to read field map {}", path.display()))
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        let df = read_csv_text_bytes(bytes)?;
        for required in [FROM, TO] {
            if df.column(required).is_err() {
                return Err(ModelError::config(format!("field map lacks column '{required}'")).into());
            }
        }
        let from = df.column(FROM)?.str()?.clone();
        let to = df.column(TO)?.str()?.clone();
        let species = df.column(SPECIES).ok().map(|c| c.str().cloned()).transpose()?;

        let renames = (0..df.height())
            .filter_map(|i| {
                let (from, to) = (from.get(i)?.trim(), to.get(i)?.trim());
                if from.is_empty() || to.is_empty() { return None }
                Some(FieldRename {
                    from: from.to_string(),
                    to: to.to_string(),
                    species: species.as_ref()
                        .and_then(|s| s.get(i))
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                })
            })
            .collect();
        Ok(Self { renames })
    }

    #[inline] pub fn len(&self) -> usize { self.renames.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.renames.is_empty() }

    /// Renames that apply to a run for `species` (untagged and `ALL` rows always apply).
    fn applicable<'a>(&'a self, species: Option<&'a str>) -> impl Iterator<Item = &'a FieldRename> {
        self.renames.iter().filter(move |r| match (&r.species, species) {
            (None, _) => true,
            (Some(tag), _) if tag.eq_ignore_ascii_case(ALL) => true,
            (Some(tag), Some(s)) => tag.eq_ignore_ascii_case(s),
            (Some(_), None) => false,
        })
    }

    /// Rename the columns of `df` that appear in the map; absent columns are skipped.
    pub fn apply(&self, mut df: DataFrame, species: Option<&str>) -> Result<DataFrame> {
        for rename in self.applicable(species) {
            if df.column(&rename.from).is_err() {
                debug!(field = %rename.from, "renamed field not in summary");
                continue;
            }
            df.rename(&rename.from, rename.to.as_str().into())
                .with_context(|| format!("Failed to rename '{}' to '{}'", rename.from, rename.to))?;
        }
        Ok(df)
    }
}
