use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Checkpointed pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Classify, rate and flatten every habitat layer into one supply layer.
    Supply,
    /// Flatten the protected-land sources.
    Protected,
    /// Areal aggregation of supply onto reporting units.
    SupplyAreal,
    /// Energy-weighted allocation of demand onto reporting units.
    Demand,
    /// Areal aggregation of protected land and of the habitat inside it.
    ProtectedAreal,
    /// Areal aggregation of the urban mask.
    UrbanAreal,
    /// Energy-weighted mean density per unit.
    WeightedMean,
}

impl Stage {
    pub const COUNT: usize = 7;

    pub const ALL: [Stage; Stage::COUNT] = [
        Stage::Supply,
        Stage::Protected,
        Stage::SupplyAreal,
        Stage::Demand,
        Stage::ProtectedAreal,
        Stage::UrbanAreal,
        Stage::WeightedMean,
    ];

    pub fn to_str(self) -> &'static str {
        match self {
            Stage::Supply => "supply",
            Stage::Protected => "protected",
            Stage::SupplyAreal => "supply_areal",
            Stage::Demand => "demand",
            Stage::ProtectedAreal => "protected_areal",
            Stage::UrbanAreal => "urban_areal",
            Stage::WeightedMean => "weighted_mean",
        }
    }

    /// Stages whose artifacts this stage reads.
    pub fn upstream(self) -> &'static [Stage] {
        match self {
            Stage::Supply | Stage::Protected | Stage::UrbanAreal => &[],
            Stage::SupplyAreal | Stage::Demand | Stage::WeightedMean => &[Stage::Supply],
            Stage::ProtectedAreal => &[Stage::Supply, Stage::Protected],
        }
    }

    #[inline]
    fn index(self) -> usize { self as usize }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.to_str())
    }
}

impl FromStr for Stage {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL.into_iter()
            .find(|stage| stage.to_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::config(format!("unknown stage '{s}'")))
    }
}

/// Which stages run; a disabled stage must be served from its checkpoint.
///
/// Parsed from `all`, a `0`/`1` vector with one digit per stage in
/// [`Stage::ALL`] order, or a comma-separated list of the stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageSet {
    enabled: [bool; Stage::COUNT],
}

impl Default for StageSet {
    fn default() -> Self { Self::all() }
}

impl StageSet {
    pub fn all() -> Self { Self { enabled: [true; Stage::COUNT] } }

    pub fn none() -> Self { Self { enabled: [false; Stage::COUNT] } }

    #[inline]
    pub fn is_enabled(&self, stage: Stage) -> bool { self.enabled[stage.index()] }

    pub fn with(mut self, stage: Stage, enabled: bool) -> Self {
        self.enabled[stage.index()] = enabled;
        self
    }

    pub fn disabled(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(|s| !self.is_enabled(*s))
    }
}

impl FromStr for StageSet {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") { return Ok(Self::all()) }

        if !s.is_empty() && s.chars().all(|c| c == '0' || c == '1') {
            if s.len() != Stage::COUNT {
                return Err(ModelError::config(format!(
                    "stage vector '{s}' must have {} digits, one per stage", Stage::COUNT)));
            }
            let mut set = Self::none();
            for (stage, c) in Stage::ALL.into_iter().zip(s.chars()) {
                set = set.with(stage, c == '1');
            }
            return Ok(set);
        }

        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .try_fold(Self::none(), |set, part| -> Result<Self, ModelError> { Ok(set.with(part.parse()?, true)) })
    }
}

impl TryFrom<String> for StageSet {
    type Error = ModelError;

    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<StageSet> for String {
    fn from(set: StageSet) -> Self { set.to_string() }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.enabled.iter().try_for_each(|&on| f.write_str(if on { "1" } else { "0" }))
    }
}
