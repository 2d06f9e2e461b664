use anyhow::{Context, Result};
use polars::prelude::*;
use serde::Serialize;

use super::compose::cols;
use crate::aggregate::BIN;

/// Supply/demand balance of one unit for one demand metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandBalance {
    pub metric: String,
    pub demand: f64,
    pub surplus: f64,
    pub protect_kcal: f64,
    pub restore_ha: f64,
    pub protect_ha: f64,
}

/// One composed output row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitSummary {
    pub bin: String,
    pub label: String,
    pub unit_ha: f64,
    pub habitat_ha: f64,
    pub habitat_kcal: f64,
    pub habitat_pct: f64,
    pub protected_ha: f64,
    pub protected_kcal: f64,
    pub urban_ha: f64,
    pub available_ha: f64,
    pub wt_mean_kcal: f64,
    pub balances: Vec<DemandBalance>,
}

impl UnitSummary {
    pub fn balance(&self, metric: &str) -> Option<&DemandBalance> {
        self.balances.iter().find(|b| b.metric == metric)
    }

    /// Typed rows of a frame produced by [`super::compose`].
    pub fn from_frame(df: &DataFrame, metrics: &[String]) -> Result<Vec<Self>> {
        let text = |name: &str| -> Result<Vec<String>> {
            Ok(df.column(name).with_context(|| format!("summary lacks '{name}'"))?
                .str()?.into_iter().map(|v| v.unwrap_or_default().to_string()).collect())
        };
        let num = |name: &str| -> Result<Vec<f64>> {
            Ok(df.column(name).with_context(|| format!("summary lacks '{name}'"))?
                .cast(&DataType::Float64)?.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
        };

        let bins = text(BIN)?;
        let labels = text(cols::LABEL)?;
        let [unit_ha, habitat_ha, habitat_kcal, habitat_pct, protected_ha, protected_kcal, urban_ha, available_ha, wt_mean_kcal] =
            [cols::UNIT_HA, cols::HABITAT_HA, cols::HABITAT_KCAL, cols::HABITAT_PCT, cols::PROTECTED_HA,
             cols::PROTECTED_KCAL, cols::URBAN_HA, cols::AVAILABLE_HA, cols::WT_MEAN_KCAL]
                .map(num);

        let balances = metrics.iter()
            .map(|m| -> Result<(&String, [Vec<f64>; 5])> {
                Ok((m, [
                    num(m)?, num(&cols::surplus(m))?, num(&cols::protect_kcal(m))?,
                    num(&cols::restore_ha(m))?, num(&cols::protect_ha(m))?,
                ]))
            })
            .collect::<Result<Vec<_>>>()?;

        let (unit_ha, habitat_ha, habitat_kcal, habitat_pct) = (unit_ha?, habitat_ha?, habitat_kcal?, habitat_pct?);
        let (protected_ha, protected_kcal, urban_ha, available_ha, wt_mean_kcal) =
            (protected_ha?, protected_kcal?, urban_ha?, available_ha?, wt_mean_kcal?);

        Ok((0..df.height())
            .map(|i| Self {
                bin: bins[i].clone(),
                label: labels[i].clone(),
                unit_ha: unit_ha[i],
                habitat_ha: habitat_ha[i],
                habitat_kcal: habitat_kcal[i],
                habitat_pct: habitat_pct[i],
                protected_ha: protected_ha[i],
                protected_kcal: protected_kcal[i],
                urban_ha: urban_ha[i],
                available_ha: available_ha[i],
                wt_mean_kcal: wt_mean_kcal[i],
                balances: balances.iter()
                    .map(|(m, [demand, surplus, protect_kcal, restore_ha, protect_ha])| DemandBalance {
                        metric: m.to_string(),
                        demand: demand[i],
                        surplus: surplus[i],
                        protect_kcal: protect_kcal[i],
                        restore_ha: restore_ha[i],
                        protect_ha: protect_ha[i],
                    })
                    .collect(),
            })
            .collect())
    }
}
