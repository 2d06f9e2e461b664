use std::str::FromStr;

use anyhow::{bail, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Statistic applied to every value column when dissolving by key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    #[default]
    Sum,
    Mean,
    Min,
    Max,
}

impl Stat {
    fn apply(self, expr: Expr) -> Expr {
        match self {
            Stat::Sum => expr.sum(),
            Stat::Mean => expr.mean(),
            Stat::Min => expr.min(),
            Stat::Max => expr.max(),
        }
    }
}

impl FromStr for Stat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(Stat::Sum),
            "mean" => Ok(Stat::Mean),
            "min" => Ok(Stat::Min),
            "max" => Ok(Stat::Max),
            other => bail!("unknown statistic '{other}'"),
        }
    }
}

/// Group `df` by `key` and reduce every other column with `stat`, keeping column names.
/// Rows come back sorted by key.
pub fn dissolve_by(df: &DataFrame, key: &str, stat: Stat) -> Result<DataFrame> {
    let aggs = df.get_column_names().into_iter()
        .filter(|c| c.as_str() != key)
        .map(|c| stat.apply(col(c.clone())).alias(c.clone()))
        .collect::<Vec<_>>();

    Ok(df.clone().lazy()
        .group_by([col(key)])
        .agg(aggs)
        .sort([key], SortMultipleOptions::default())
        .collect()?)
}
