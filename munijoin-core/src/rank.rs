//! Top-N and bottom-N slices of the merged table.

use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{MunijoinError, MunijoinResult};
use crate::source::column_names;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RankOrder {
    /// Largest values first.
    Top,
    /// Smallest values first.
    Bottom,
}

/// A ranking request: `size` rows of `metric` in `order`. Without a size, the configured
/// default applies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RankSpec {
    pub metric: String,
    pub order: RankOrder,
    #[serde(default)]
    pub size: Option<usize>,
}

impl RankSpec {
    pub fn new(metric: &str, order: RankOrder, size: Option<usize>) -> Self {
        Self {
            metric: metric.into(),
            order,
            size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankedSlice {
    pub metric: String,
    pub order: RankOrder,
    pub df: DataFrame,
}

/// Up to `size` rows of `df` ordered by `metric`. Rows with a null (or NaN) metric are left
/// out and ties keep their order in `df`.
pub fn rank(
    df: &DataFrame,
    metric: &str,
    order: RankOrder,
    size: usize,
) -> MunijoinResult<RankedSlice> {
    let column = df
        .column(metric)
        .map_err(|_| MunijoinError::UnknownColumn {
            column: metric.to_string(),
            available: column_names(df),
        })?
        .cast(&DataType::Float64)?;

    let mut ranked: Vec<(IdxSize, f64)> = column
        .f64()?
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| {
            let value = value.filter(|v| !v.is_nan())?;
            Some((idx as IdxSize, value))
        })
        .collect();
    // `sort_by` is stable, so equal values stay in row order.
    ranked.sort_by(|(_, a), (_, b)| match order {
        RankOrder::Top => b.total_cmp(a),
        RankOrder::Bottom => a.total_cmp(b),
    });
    let rows: Vec<IdxSize> = ranked.into_iter().take(size).map(|(idx, _)| idx).collect();
    debug!(
        "{order} {} of `{metric}`: {} of {} row(s) ranked",
        size,
        rows.len(),
        df.height()
    );

    let df = df.take(&IdxCa::from_vec("rows", rows))?;
    Ok(RankedSlice {
        metric: metric.to_string(),
        order,
        df,
    })
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn names(slice: &RankedSlice) -> anyhow::Result<Vec<String>> {
        Ok(slice
            .df
            .column("name")?
            .str()?
            .into_iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect())
    }

    #[test]
    fn ties_keep_input_order() -> anyhow::Result<()> {
        let df = df!(
            "name" => ["A", "B", "C"],
            "value" => [10i64, 10, 5]
        )?;
        let top = rank(&df, "value", RankOrder::Top, 2)?;
        assert_eq!(names(&top)?, vec!["A", "B"]);
        let bottom = rank(&df, "value", RankOrder::Bottom, 2)?;
        assert_eq!(names(&bottom)?, vec!["C", "A"]);
        Ok(())
    }

    #[test]
    fn null_metrics_are_excluded() -> anyhow::Result<()> {
        let df = df!(
            "name" => ["A", "B", "C", "D"],
            "value" => [None, Some(1.5), Some(f64::NAN), Some(-2.0)]
        )?;
        let bottom = rank(&df, "value", RankOrder::Bottom, 10)?;
        assert_eq!(names(&bottom)?, vec!["D", "B"]);
        assert_eq!(bottom.df.width(), 2);
        Ok(())
    }

    #[test]
    fn unknown_metric_is_reported_with_available_columns() -> anyhow::Result<()> {
        let df = df!("name" => ["A"], "value" => [1i64])?;
        match rank(&df, "Totl", RankOrder::Top, 5) {
            Err(MunijoinError::UnknownColumn { column, available }) => {
                assert_eq!(column, "Totl");
                assert_eq!(available, vec!["name", "value"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn order_parses_from_text() {
        assert_eq!(RankOrder::from_str("bottom").unwrap(), RankOrder::Bottom);
        assert_eq!(RankOrder::Top.to_string(), "top");
    }
}
