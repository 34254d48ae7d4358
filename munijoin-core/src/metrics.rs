//! Derived metrics over merged columns. Every expression here propagates nulls and never
//! divides by zero.

use log::debug;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

use crate::COL;

fn area_column() -> String {
    COL::AREA_KM2.to_string()
}

/// A column computed from other merged columns after all joins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedMetric {
    /// `value / per`, null when `per` is zero, negative or null.
    Density {
        name: String,
        value: String,
        #[serde(default = "area_column")]
        per: String,
    },
    /// `numerator / denominator * 100` rounded to two decimals, null when the denominator is
    /// zero or null.
    Percentage {
        name: String,
        numerator: String,
        denominator: String,
    },
}

impl DerivedMetric {
    /// Density of `value` per km² of boundary.
    pub fn density(name: &str, value: &str) -> Self {
        DerivedMetric::Density {
            name: name.into(),
            value: value.into(),
            per: area_column(),
        }
    }

    pub fn percentage(name: &str, numerator: &str, denominator: &str) -> Self {
        DerivedMetric::Percentage {
            name: name.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DerivedMetric::Density { name, .. } | DerivedMetric::Percentage { name, .. } => name,
        }
    }

    /// Columns the metric reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            DerivedMetric::Density { value, per, .. } => vec![value.as_str(), per.as_str()],
            DerivedMetric::Percentage {
                numerator,
                denominator,
                ..
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }

    pub fn expr(&self) -> Expr {
        match self {
            DerivedMetric::Density { name, value, per } => {
                density_expr(col(value), col(per)).alias(name)
            }
            DerivedMetric::Percentage {
                name,
                numerator,
                denominator,
            } => percentage_expr(col(numerator), col(denominator)).alias(name),
        }
    }
}

/// `value / area`, null unless `area` is strictly positive.
pub fn density_expr(value: Expr, area: Expr) -> Expr {
    let area = area.cast(DataType::Float64);
    when(area.clone().gt(lit(0.0)))
        .then(value.cast(DataType::Float64) / area)
        .otherwise(lit(NULL))
}

/// `numerator / denominator * 100`, rounded to two decimals. A zero denominator gives null.
pub fn percentage_expr(numerator: Expr, denominator: Expr) -> Expr {
    let denominator = denominator.cast(DataType::Float64);
    when(denominator.clone().neq(lit(0.0)))
        .then((numerator.cast(DataType::Float64) / denominator * lit(100.0)).round(2))
        .otherwise(lit(NULL))
}

/// Sum that is null when no value in the group is present, rather than zero.
pub fn min_count_sum(values: Expr) -> Expr {
    when(values.clone().is_not_null().sum().gt(lit(0)))
        .then(values.sum())
        .otherwise(lit(NULL))
}

/// Append every metric to `df`, in order, so a metric may read the ones before it.
pub fn derive(df: DataFrame, metrics: &[DerivedMetric]) -> PolarsResult<DataFrame> {
    let mut lf = df.lazy();
    for metric in metrics {
        debug!("Deriving `{}` from {:?}", metric.name(), metric.inputs());
        lf = lf.with_column(metric.expr());
    }
    lf.collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(df: &DataFrame, name: &str) -> anyhow::Result<Vec<Option<f64>>> {
        Ok(df.column(name)?.f64()?.into_iter().collect())
    }

    #[test]
    fn density_is_null_for_zero_or_null_area() -> anyhow::Result<()> {
        let df = df!(
            "total" => [Some(30i64), Some(10), None, Some(4)],
            "area_km2" => [Some(100.0), Some(0.0), Some(50.0), None]
        )?;
        let df = derive(df, &[DerivedMetric::density("per_km2", "total")])?;
        assert_eq!(values(&df, "per_km2")?, vec![Some(0.3), None, None, None]);
        Ok(())
    }

    #[test]
    fn percentage_rounds_to_two_decimals() -> anyhow::Result<()> {
        let df = df!(
            "num" => [Some(25i64), Some(1), Some(5), None],
            "den" => [Some(200i64), Some(3), Some(0), Some(10)]
        )?;
        let df = derive(df, &[DerivedMetric::percentage("pct", "num", "den")])?;
        assert_eq!(
            values(&df, "pct")?,
            vec![Some(12.5), Some(33.33), None, None]
        );
        Ok(())
    }

    #[test]
    fn metrics_can_build_on_earlier_metrics() -> anyhow::Result<()> {
        let df = df!(
            "green" => [2.0, 0.0],
            "area_km2" => [8.0, 4.0]
        )?;
        let metrics = [
            DerivedMetric::density("green_share", "green"),
            DerivedMetric::percentage("green_pct_of_share", "green", "green_share"),
        ];
        let df = derive(df, &metrics)?;
        assert_eq!(values(&df, "green_share")?, vec![Some(0.25), Some(0.0)]);
        assert_eq!(values(&df, "green_pct_of_share")?, vec![Some(800.0), None]);
        Ok(())
    }

    #[test]
    fn min_count_sum_is_null_only_for_all_null_groups() -> anyhow::Result<()> {
        let df = df!(
            "key" => ["a", "a", "b", "b", "c"],
            "v" => [Some(1i64), None, None, None, Some(0)]
        )?;
        let out = df
            .lazy()
            .group_by_stable([col("key")])
            .agg([min_count_sum(col("v")).alias("v")])
            .collect()?;
        let sums: Vec<Option<i64>> = out.column("v")?.i64()?.into_iter().collect();
        assert_eq!(sums, vec![Some(1), None, Some(0)]);
        Ok(())
    }

    #[test]
    fn metric_config_deserializes_with_default_area() -> anyhow::Result<()> {
        let metric: DerivedMetric =
            serde_json::from_str(r#"{"kind": "density", "name": "d", "value": "Total"}"#)?;
        assert_eq!(metric, DerivedMetric::density("d", "Total"));
        assert_eq!(metric.inputs(), vec!["Total", COL::AREA_KM2]);
        Ok(())
    }
}
