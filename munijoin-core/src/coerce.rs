//! Parsing of noisy numeric text into nullable numbers.

use log::{debug, warn};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::ColumnSpec;

/// How the text of a value column is turned into numbers.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
    /// Integer-coded count. Every non-digit character is stripped before parsing.
    #[default]
    Count,
    /// Decimal number, keeping sign and decimal point.
    Decimal,
}

/// Keep only the decimal digits of `raw` and parse them. No digits (or overflow) is `None`.
///
/// Signs and decimal points do not survive: `"-12"` is 12 and `"3.5"` is 35.
pub fn parse_count(raw: &str) -> Option<i64> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Whether [`parse_count`] produced a number from text carrying a sign or decimal point.
pub fn is_lossy_count(raw: &str) -> bool {
    raw.contains(['-', '.']) && parse_count(raw).is_some()
}

/// Locale-agnostic decimal parsing. Unparseable or non-finite values are `None`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Null accounting for one coerced column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ColumnQuality {
    pub source: String,
    pub column: String,
    /// Cells holding any non-blank text.
    pub non_empty: usize,
    /// Non-blank cells that could not be parsed and became null.
    pub nulls_introduced: usize,
    /// Count cells that lost a sign or decimal point.
    pub lossy: usize,
}

/// Coerce a text column according to `kind`, keeping its name. Counts become `Int64`, decimals
/// `Float64`.
pub fn coerce_series(
    s: &Series,
    kind: ValueKind,
    source: &str,
) -> PolarsResult<(Series, ColumnQuality)> {
    let text = s.cast(&DataType::String)?;
    let mut quality = ColumnQuality {
        source: source.to_string(),
        column: s.name().to_string(),
        ..Default::default()
    };
    let non_blank = text
        .str()?
        .into_iter()
        .map(|v| v.filter(|v| !v.trim().is_empty()));

    let coerced = match kind {
        ValueKind::Count => {
            let values: Vec<Option<i64>> = non_blank
                .map(|v| {
                    let v = v?;
                    quality.non_empty += 1;
                    let parsed = parse_count(v);
                    if parsed.is_none() {
                        quality.nulls_introduced += 1;
                    } else if is_lossy_count(v) {
                        quality.lossy += 1;
                    }
                    parsed
                })
                .collect();
            Series::new(s.name(), values)
        }
        ValueKind::Decimal => {
            let values: Vec<Option<f64>> = non_blank
                .map(|v| {
                    let v = v?;
                    quality.non_empty += 1;
                    let parsed = parse_decimal(v);
                    if parsed.is_none() {
                        quality.nulls_introduced += 1;
                    }
                    parsed
                })
                .collect();
            Series::new(s.name(), values)
        }
    };
    Ok((coerced, quality))
}

/// Coerce every column of `df` that one of `specs` names. Columns the frame lacks are skipped.
pub fn coerce_frame(
    df: &mut DataFrame,
    specs: &[ColumnSpec],
    source: &str,
) -> PolarsResult<Vec<ColumnQuality>> {
    let mut report = vec![];
    for spec in specs {
        let Ok(column) = df.column(&spec.canonical) else {
            continue;
        };
        let (coerced, quality) = coerce_series(column, spec.kind, source)?;
        if quality.lossy > 0 {
            warn!(
                "{source}: {} value(s) of `{}` lost a sign or decimal point when read as counts",
                quality.lossy, quality.column
            );
        }
        debug!(
            "{source}: `{}` has {} non-empty cell(s), {} unparseable",
            quality.column, quality.non_empty, quality.nulls_introduced
        );
        df.with_column(coerced)?;
        report.push(quality);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_keep_only_digits() {
        assert_eq!(parse_count("1,204"), Some(1204));
        assert_eq!(parse_count(" 17 "), Some(17));
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(parse_count(""), None);
        assert_eq!(parse_count("*"), None);
    }

    #[test]
    fn counts_drop_signs_and_decimal_points() {
        assert_eq!(parse_count("-12"), Some(12));
        assert_eq!(parse_count("3.5"), Some(35));
        assert!(is_lossy_count("-12"));
        assert!(is_lossy_count("3.5"));
        assert!(!is_lossy_count("1,204"));
        assert!(!is_lossy_count("-"));
    }

    #[test]
    fn count_overflow_is_null() {
        assert_eq!(parse_count("99999999999999999999999"), None);
    }

    #[test]
    fn decimals_keep_sign_and_point() {
        assert_eq!(parse_decimal("-3.25"), Some(-3.25));
        assert_eq!(parse_decimal(" 21.5 "), Some(21.5));
        assert_eq!(parse_decimal("1e3"), Some(1000.0));
        assert_eq!(parse_decimal("1,5"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn column_quality_counts_introduced_nulls() -> anyhow::Result<()> {
        let s = Series::new("Total", &[Some("12"), Some("x"), None, Some(" "), Some("-3")]);
        let (coerced, quality) = coerce_series(&s, ValueKind::Count, "units")?;
        assert_eq!(coerced.dtype(), &DataType::Int64);
        let values: Vec<Option<i64>> = coerced.i64()?.into_iter().collect();
        assert_eq!(values, vec![Some(12), None, None, None, Some(3)]);
        assert_eq!(
            quality,
            ColumnQuality {
                source: "units".into(),
                column: "Total".into(),
                non_empty: 3,
                nulls_introduced: 1,
                lossy: 1,
            }
        );
        Ok(())
    }

    #[test]
    fn frame_coercion_skips_absent_columns() -> anyhow::Result<()> {
        let mut df = df!(
            "Municipio" => ["Apodaca", "García"],
            "temperatura_media" => ["22.5", "bad"]
        )?;
        let specs = [
            ColumnSpec::new("temperatura_media", &[], ValueKind::Decimal),
            ColumnSpec::new("TVIVHAB", &[], ValueKind::Count),
        ];
        let report = coerce_frame(&mut df, &specs, "temperature")?;
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].nulls_introduced, 1);
        let temps: Vec<Option<f64>> = df.column("temperatura_media")?.f64()?.into_iter().collect();
        assert_eq!(temps, vec![Some(22.5), None]);
        assert_eq!(df.column("Municipio")?.dtype(), &DataType::String);
        Ok(())
    }
}
