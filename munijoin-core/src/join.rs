//! Aggregation of fact rows per municipality key and the left joins onto the dimension spine.

use std::collections::HashSet;

use itertools::Itertools;
use log::{debug, info, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::AggregateSpec;
use crate::metrics::min_count_sum;
use crate::COL;

/// How the rows of one municipality are folded into a single value.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Aggregation {
    /// Sum of present values, null when none is present.
    #[default]
    Sum,
    /// Mean of present values, null when none is present.
    Mean,
    /// Number of present values.
    Count,
}

impl Aggregation {
    pub fn expr(&self, column: &str, name: &str) -> Expr {
        match self {
            Aggregation::Sum => min_count_sum(col(column)),
            Aggregation::Mean => col(column).cast(DataType::Float64).mean(),
            Aggregation::Count => col(column).is_not_null().sum().cast(DataType::Int64),
        }
        .alias(name)
    }
}

/// Fold `df` to one row per [`COL::MUNI_KEY`], keeping first-seen key order. Rows with an empty
/// key cannot identify a municipality and are dropped first.
pub fn aggregate_by_key(df: DataFrame, fields: &[AggregateSpec]) -> PolarsResult<DataFrame> {
    let aggregations = fields
        .iter()
        .map(|f| f.aggregation.expr(&f.column, &f.name))
        .collect_vec();
    df.lazy()
        .filter(col(COL::MUNI_KEY).neq(lit("")))
        .group_by_stable([col(COL::MUNI_KEY)])
        .agg(aggregations)
        .collect()
}

/// One source's contribution, already aggregated to unique keys.
#[derive(Debug, Clone)]
pub struct FactTable {
    pub source: String,
    /// Rows read from the file, before aggregation.
    pub rows_read: usize,
    /// [`COL::MUNI_KEY`] plus the source's output fields.
    pub df: DataFrame,
}

#[derive(Debug, Clone)]
pub enum FactSource {
    Present(FactTable),
    /// Optional source whose file does not exist. Its fields are still added, as nulls.
    Absent {
        source: String,
        fields: Vec<(String, DataType)>,
    },
}

impl FactSource {
    pub fn name(&self) -> &str {
        match self {
            FactSource::Present(table) => &table.source,
            FactSource::Absent { source, .. } => source,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceStatus {
    Loaded,
    Absent,
}

/// How well a fact source lined up with the dimension.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SourceCoverage {
    pub source: String,
    pub status: SourceStatus,
    pub rows_read: usize,
    pub distinct_keys: usize,
    pub matched_keys: usize,
    /// Fact keys with no dimension entry, sorted.
    pub unmatched_keys: Vec<String>,
    /// Dimension rows this source has no value for.
    pub dimension_rows_unmatched: usize,
}

fn coverage(spine_keys: &[&str], fact: &FactSource) -> PolarsResult<SourceCoverage> {
    let FactSource::Present(table) = fact else {
        return Ok(SourceCoverage {
            source: fact.name().to_string(),
            status: SourceStatus::Absent,
            rows_read: 0,
            distinct_keys: 0,
            matched_keys: 0,
            unmatched_keys: vec![],
            dimension_rows_unmatched: spine_keys.len(),
        });
    };
    let dimension: HashSet<&str> = spine_keys.iter().copied().collect();
    let fact_keys: HashSet<&str> = table
        .df
        .column(COL::MUNI_KEY)?
        .str()?
        .into_no_null_iter()
        .collect();
    let unmatched_keys = fact_keys
        .iter()
        .filter(|k| !dimension.contains(*k))
        .map(|k| k.to_string())
        .sorted()
        .collect_vec();

    Ok(SourceCoverage {
        source: table.source.clone(),
        status: SourceStatus::Loaded,
        rows_read: table.rows_read,
        distinct_keys: fact_keys.len(),
        matched_keys: fact_keys.len() - unmatched_keys.len(),
        dimension_rows_unmatched: spine_keys.iter().filter(|k| !fact_keys.contains(*k)).count(),
        unmatched_keys,
    })
}

/// Left-join every fact source onto `spine` by [`COL::MUNI_KEY`].
///
/// The result has exactly the spine's rows, in the spine's order. Each source adds only its own
/// columns, so the order sources are joined in does not change any value.
pub fn left_join_all(
    spine: &DataFrame,
    facts: &[FactSource],
) -> PolarsResult<(DataFrame, Vec<SourceCoverage>)> {
    let spine_keys: Vec<&str> = spine
        .column(COL::MUNI_KEY)?
        .str()?
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();

    let mut merged = spine.clone().lazy().with_row_index(COL::ROW_INDEX, None);
    let mut report = Vec::with_capacity(facts.len());
    for fact in facts {
        let coverage = coverage(&spine_keys, fact)?;
        if !coverage.unmatched_keys.is_empty() {
            warn!(
                "{}: {} key(s) match no municipality: {}",
                coverage.source,
                coverage.unmatched_keys.len(),
                coverage.unmatched_keys.iter().join(", ")
            );
        }
        info!(
            "{}: {} of {} municipalities matched",
            coverage.source,
            spine_keys.len() - coverage.dimension_rows_unmatched,
            spine_keys.len()
        );
        report.push(coverage);

        merged = match fact {
            FactSource::Present(table) => merged.join(
                table.df.clone().lazy(),
                [col(COL::MUNI_KEY)],
                [col(COL::MUNI_KEY)],
                JoinArgs::new(JoinType::Left),
            ),
            FactSource::Absent { fields, .. } => merged.with_columns(
                fields
                    .iter()
                    .map(|(name, dtype)| lit(NULL).cast(dtype.clone()).alias(name))
                    .collect_vec(),
            ),
        };
    }

    let merged = merged
        .sort([COL::ROW_INDEX], Default::default())
        .select([col("*").exclude([COL::ROW_INDEX])])
        .collect()?;
    if merged.height() != spine.height() {
        return Err(PolarsError::ComputeError(
            format!(
                "join produced {} rows for {} municipalities",
                merged.height(),
                spine.height()
            )
            .into(),
        ));
    }
    debug!("Merged table has shape {:?}", merged.shape());
    Ok((merged, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spine() -> DataFrame {
        df!(
            COL::MUNICIPIO => ["Monterrey", "Apodaca", "García"],
            COL::MUNI_KEY => ["monterrey", "apodaca", "garcia"],
            COL::AREA_KM2 => [100.0, 50.0, 20.0]
        )
        .unwrap()
    }

    fn table(source: &str, df: DataFrame) -> FactSource {
        FactSource::Present(FactTable {
            source: source.into(),
            rows_read: df.height(),
            df,
        })
    }

    #[test]
    fn aggregation_folds_duplicates_and_drops_empty_keys() -> anyhow::Result<()> {
        let facts = df!(
            COL::MUNI_KEY => ["apodaca", "", "monterrey", "apodaca", "garcia"],
            "Total" => [Some(2i64), Some(99), None, Some(3), None],
            "temp" => [Some(20.0), None, Some(25.0), Some(22.0), None]
        )?;
        let fields = [
            AggregateSpec::new("Total", "Total", Aggregation::Sum),
            AggregateSpec::new("temp", "temp", Aggregation::Mean),
            AggregateSpec::new("n", "Total", Aggregation::Count),
        ];
        let out = aggregate_by_key(facts, &fields)?;
        let keys: Vec<Option<&str>> = out.column(COL::MUNI_KEY)?.str()?.into_iter().collect();
        assert_eq!(keys, vec![Some("apodaca"), Some("monterrey"), Some("garcia")]);
        let totals: Vec<Option<i64>> = out.column("Total")?.i64()?.into_iter().collect();
        assert_eq!(totals, vec![Some(5), None, None]);
        let temps: Vec<Option<f64>> = out.column("temp")?.f64()?.into_iter().collect();
        assert_eq!(temps, vec![Some(21.0), Some(25.0), None]);
        let counts: Vec<Option<i64>> = out.column("n")?.i64()?.into_iter().collect();
        assert_eq!(counts, vec![Some(2), Some(0), Some(0)]);
        Ok(())
    }

    #[test]
    fn row_count_is_always_the_dimension_count() -> anyhow::Result<()> {
        let partial = table(
            "units",
            df!(COL::MUNI_KEY => ["monterrey", "santiago"], "Total" => [30i64, 4])?,
        );
        let absent = FactSource::Absent {
            source: "emissions".into(),
            fields: vec![("emisiones_co2".into(), DataType::Float64)],
        };

        for facts in [
            vec![],
            vec![partial.clone()],
            vec![partial.clone(), absent.clone()],
        ] {
            let (merged, report) = left_join_all(&spine(), &facts)?;
            assert_eq!(merged.height(), 3);
            assert_eq!(report.len(), facts.len());
        }

        let (merged, report) = left_join_all(&spine(), &[absent, partial])?;
        assert_eq!(
            merged.get_column_names(),
            vec![
                COL::MUNICIPIO,
                COL::MUNI_KEY,
                COL::AREA_KM2,
                "emisiones_co2",
                "Total"
            ]
        );
        let keys: Vec<Option<&str>> = merged.column(COL::MUNI_KEY)?.str()?.into_iter().collect();
        assert_eq!(keys, vec![Some("monterrey"), Some("apodaca"), Some("garcia")]);
        let totals: Vec<Option<i64>> = merged.column("Total")?.i64()?.into_iter().collect();
        assert_eq!(totals, vec![Some(30), None, None]);
        assert_eq!(merged.column("emisiones_co2")?.null_count(), 3);
        assert_eq!(merged.column("emisiones_co2")?.dtype(), &DataType::Float64);

        assert_eq!(report[0].status, SourceStatus::Absent);
        assert_eq!(report[0].dimension_rows_unmatched, 3);
        assert_eq!(
            report[1],
            SourceCoverage {
                source: "units".into(),
                status: SourceStatus::Loaded,
                rows_read: 2,
                distinct_keys: 2,
                matched_keys: 1,
                unmatched_keys: vec!["santiago".into()],
                dimension_rows_unmatched: 2,
            }
        );
        Ok(())
    }

    #[test]
    fn join_order_does_not_change_values() -> anyhow::Result<()> {
        let units = table(
            "units",
            df!(COL::MUNI_KEY => ["garcia", "monterrey"], "Total" => [7i64, 30])?,
        );
        let census = table(
            "census",
            df!(COL::MUNI_KEY => ["apodaca", "garcia"], "TVIVHAB" => [1000i64, 200])?,
        );
        let (a, _) = left_join_all(&spine(), &[units.clone(), census.clone()])?;
        let (b, _) = left_join_all(&spine(), &[census, units])?;
        let b = b.select(a.get_column_names())?;
        assert!(a.equals_missing(&b));
        Ok(())
    }
}
