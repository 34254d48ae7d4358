//! Per-source preparation and the merged table produced from it.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::try_join_all;
use itertools::Itertools;
use log::{debug, info};
use polars::prelude::*;

use crate::coerce::{coerce_frame, coerce_series, ColumnQuality, ValueKind};
use crate::config::{AggregateSpec, ColumnSpec, Config, ExportConfig, SourceConfig};
use crate::error::{MunijoinError, MunijoinResult};
use crate::formatters::{OutputFormatter, OutputGenerator};
use crate::geo::MunicipalityDimension;
use crate::join::{
    aggregate_by_key, left_join_all, Aggregation, FactSource, FactTable, SourceCoverage,
};
use crate::metrics::derive;
use crate::normalize::key_series;
use crate::rank::rank;
use crate::schema::reconcile;
use crate::source::{column_names, load_table};
use crate::COL;

/// The dimension left-joined with every fact source, plus derived metrics, and what was learnt
/// about the inputs along the way.
#[derive(Debug, Clone)]
pub struct MergedTable {
    pub df: DataFrame,
    pub coverage: Vec<SourceCoverage>,
    pub quality: Vec<ColumnQuality>,
}

fn output_dtype(source: &SourceConfig, field: &AggregateSpec) -> DataType {
    match field.aggregation {
        Aggregation::Mean => DataType::Float64,
        Aggregation::Count => DataType::Int64,
        Aggregation::Sum => match source.column(&field.column).map(|c| c.kind) {
            Some(ValueKind::Decimal) => DataType::Float64,
            _ => DataType::Int64,
        },
    }
}

/// Load one fact source and fold it to one row per municipality key.
///
/// A missing file is [`FactSource::Absent`] unless the source is required. Value columns the
/// file lacks are carried as nulls.
pub fn prepare_source(
    source: &SourceConfig,
    path: &Path,
    dimension: &MunicipalityDimension,
) -> MunijoinResult<(FactSource, Vec<ColumnQuality>)> {
    let fields = source.output_fields();
    let Some(mut df) = load_table(path)? else {
        if source.required {
            return Err(MunijoinError::MissingRequiredSource {
                source_name: source.name.clone(),
                path: path.to_path_buf(),
            });
        }
        let fields = fields
            .iter()
            .map(|f| (f.name.clone(), output_dtype(source, f)))
            .collect();
        return Ok((
            FactSource::Absent {
                source: source.name.clone(),
                fields,
            },
            vec![],
        ));
    };
    let rows_read = df.height();

    let key_specs: Vec<ColumnSpec> = match (&source.municipality, &source.location) {
        (Some(municipality), _) => vec![municipality.clone().required()],
        (None, Some(location)) => vec![
            location.longitude.clone().required(),
            location.latitude.clone().required(),
        ],
        (None, None) => {
            return Err(MunijoinError::InvalidConfig(format!(
                "source `{}` has neither `municipality` nor `location`",
                source.name
            )))
        }
    };
    let specs = key_specs
        .iter()
        .chain(&source.columns)
        .cloned()
        .collect_vec();
    let reconciled = reconcile(&mut df, &specs, path)?;
    for missing in &reconciled.missing {
        debug!("{}: `{missing}` not found, carried as null", source.name);
        df.with_column(Series::full_null(missing, df.height(), &DataType::String))?;
    }

    let quality = coerce_frame(&mut df, &source.columns, &source.name)?;

    let keys = match &source.location {
        Some(location) if source.municipality.is_none() => {
            let lon = df.column(&location.longitude.canonical)?;
            let lat = df.column(&location.latitude.canonical)?;
            let (lon, _) = coerce_series(lon, ValueKind::Decimal, &source.name)?;
            let (lat, _) = coerce_series(lat, ValueKind::Decimal, &source.name)?;
            dimension.locate_series(&lon, &lat, COL::MUNI_KEY)?
        }
        _ => key_series(df.column(&key_specs[0].canonical)?, COL::MUNI_KEY)?,
    };
    df.with_column(keys)?;

    let df = aggregate_by_key(df, &fields)?;
    info!(
        "{}: {rows_read} row(s) folded into {} municipality key(s)",
        source.name,
        df.height()
    );
    Ok((
        FactSource::Present(FactTable {
            source: source.name.clone(),
            rows_read,
            df,
        }),
        quality,
    ))
}

/// Prepare every source concurrently, then join them in configuration order against the
/// dimension and append the derived metrics.
pub async fn merge(config: &Config, dimension: Arc<MunicipalityDimension>) -> Result<MergedTable> {
    let tasks = config.sources.iter().map(|source| {
        let source = source.clone();
        let path = config.source_path(&source);
        let dimension = Arc::clone(&dimension);
        tokio::task::spawn_blocking(move || prepare_source(&source, &path, &dimension))
    });
    let prepared = try_join_all(tasks)
        .await?
        .into_iter()
        .collect::<MunijoinResult<Vec<_>>>()?;
    let (facts, quality): (Vec<FactSource>, Vec<Vec<ColumnQuality>>) =
        prepared.into_iter().unzip();

    let spine = dimension.to_dataframe(config.area_projection)?;
    let (df, coverage) = left_join_all(&spine, &facts)?;
    let df = derive(df, &config.derived)?;
    Ok(MergedTable {
        df,
        coverage,
        quality: quality.into_iter().flatten().collect(),
    })
}

/// Restrict `df` to `columns`, in that order.
pub fn select_columns(df: &DataFrame, columns: &[String]) -> MunijoinResult<DataFrame> {
    if let Some(missing) = columns
        .iter()
        .find(|c| df.get_column_index(c).is_none())
    {
        return Err(MunijoinError::UnknownColumn {
            column: missing.clone(),
            available: column_names(df),
        });
    }
    Ok(df.select(columns.iter().map(String::as_str))?)
}

/// The frame an export writes: the ranked slice or the whole table, restricted to the export's
/// columns and renamed.
pub fn export_frame(
    merged: &DataFrame,
    export: &ExportConfig,
    default_slice_size: usize,
) -> MunijoinResult<DataFrame> {
    let rows = match &export.rank {
        Some(spec) => {
            rank(
                merged,
                &spec.metric,
                spec.order,
                spec.size.unwrap_or(default_slice_size),
            )?
            .df
        }
        None => merged.clone(),
    };
    let mut df = select_columns(&rows, &export.columns)?;
    for (from, to) in &export.rename {
        if df.get_column_index(from).is_some() {
            df.rename(from, to)?;
        }
    }
    Ok(df)
}

/// Write every configured export under `config.output_dir`.
pub fn write_exports(config: &Config, merged: &DataFrame) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_dir.display()
        )
    })?;
    config
        .exports
        .iter()
        .map(|export| -> Result<PathBuf> {
            let mut df = export_frame(merged, export, config.default_slice_size)?;
            let path = config.export_path(export);
            let mut file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            OutputFormatter::from(export.format).save(&mut file, &mut df)?;
            info!("Wrote {} row(s) to {}", df.height(), path.display());
            Ok(path)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use super::*;
    use crate::config::LocationSpec;
    use crate::formatters::OutputFormat;
    use crate::geo::tests::square;
    use crate::geo::Municipality;
    use crate::rank::{RankOrder, RankSpec};

    fn dimension() -> MunicipalityDimension {
        MunicipalityDimension::new(
            "municipios.geojson".into(),
            vec![
                Municipality::new(Some("Monterrey"), Some(square(-100.4, 25.6, 0.2))),
                Municipality::new(Some("Apodaca"), Some(square(-100.2, 25.7, 0.2))),
            ],
        )
    }

    fn units_source() -> SourceConfig {
        Config::default()
            .sources
            .into_iter()
            .find(|s| s.name == "medical_units")
            .unwrap()
    }

    #[test]
    fn named_source_is_reconciled_coerced_and_aggregated() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("unidades.csv");
        fs::write(
            &path,
            "\u{feff}NOM_MUN,Unidades\nMONTERREY,\"1,200\"\nMonterrey,4\nApodaca,n/d\n,7\n",
        )?;
        let (fact, quality) = prepare_source(&units_source(), &path, &dimension())?;
        let FactSource::Present(table) = fact else {
            panic!("source should be present");
        };
        assert_eq!(table.rows_read, 4);
        assert_eq!(
            table.df.get_column_names(),
            vec![COL::MUNI_KEY, COL::TOTAL]
        );
        let keys: Vec<Option<&str>> = table.df.column(COL::MUNI_KEY)?.str()?.into_iter().collect();
        assert_eq!(keys, vec![Some("monterrey"), Some("apodaca")]);
        let totals: Vec<Option<i64>> = table.df.column(COL::TOTAL)?.i64()?.into_iter().collect();
        assert_eq!(totals, vec![Some(1204), None]);
        assert_eq!(quality[0].nulls_introduced, 1);
        Ok(())
    }

    #[test]
    fn clashing_headers_do_not_abort_the_source() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let both_cases = dir.path().join("both_cases.csv");
        fs::write(&both_cases, "MUNICIPIO,Municipio,Total\nMONTERREY,Apodaca,3\n")?;
        let repeated = dir.path().join("repeated.csv");
        fs::write(&repeated, "Municipio,Total,Total\u{a0}\nApodaca,5,9\n")?;

        for (path, expected) in [(both_cases, 3i64), (repeated, 5)] {
            let (fact, _) = prepare_source(&units_source(), &path, &dimension())?;
            let FactSource::Present(table) = fact else {
                panic!("source should be present");
            };
            let keys: Vec<Option<&str>> =
                table.df.column(COL::MUNI_KEY)?.str()?.into_iter().collect();
            assert_eq!(keys, vec![Some("apodaca")]);
            let totals: Vec<Option<i64>> =
                table.df.column(COL::TOTAL)?.i64()?.into_iter().collect();
            assert_eq!(totals, vec![Some(expected)]);
        }
        Ok(())
    }

    #[test]
    fn absent_optional_source_keeps_typed_fields() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let (fact, quality) =
            prepare_source(&units_source(), &dir.path().join("nope.csv"), &dimension())?;
        assert!(quality.is_empty());
        match fact {
            FactSource::Absent { source, fields } => {
                assert_eq!(source, "medical_units");
                assert_eq!(fields, vec![(COL::TOTAL.to_string(), DataType::Int64)]);
            }
            FactSource::Present(_) => panic!("source should be absent"),
        }
        Ok(())
    }

    #[test]
    fn absent_required_source_is_fatal() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let mut source = units_source();
        source.required = true;
        let err = prepare_source(&source, &dir.path().join("nope.csv"), &dimension()).unwrap_err();
        assert!(matches!(
            err,
            MunijoinError::MissingRequiredSource { source_name, .. } if source_name == "medical_units"
        ));
        Ok(())
    }

    #[test]
    fn points_are_counted_per_containing_municipality() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("points.csv");
        fs::write(
            &path,
            "lon,lat,population_density\n-100.3,25.7,10.5\n-100.3,25.65,4.5\n-100.1,25.8,2\n-90,10,7\n",
        )?;
        let source = SourceConfig {
            name: "population".into(),
            path: path.clone(),
            required: false,
            municipality: None,
            location: Some(LocationSpec {
                longitude: ColumnSpec::new(COL::LONGITUDE, &["lon", "x"], ValueKind::Decimal),
                latitude: ColumnSpec::new(COL::LATITUDE, &["lat", "y"], ValueKind::Decimal),
            }),
            columns: vec![ColumnSpec::new(
                COL::POPULATION_DENSITY,
                &[],
                ValueKind::Decimal,
            )],
            aggregates: vec![
                AggregateSpec::new(
                    COL::SUM_POPULATION_DENSITY,
                    COL::POPULATION_DENSITY,
                    Aggregation::Sum,
                ),
                AggregateSpec::new(COL::POINT_COUNT, COL::POPULATION_DENSITY, Aggregation::Count),
            ],
        };
        let (fact, _) = prepare_source(&source, &path, &dimension())?;
        let FactSource::Present(table) = fact else {
            panic!("source should be present");
        };
        let keys: Vec<Option<&str>> = table.df.column(COL::MUNI_KEY)?.str()?.into_iter().collect();
        assert_eq!(keys, vec![Some("monterrey"), Some("apodaca")]);
        let sums: Vec<Option<f64>> = table
            .df
            .column(COL::SUM_POPULATION_DENSITY)?
            .f64()?
            .into_iter()
            .collect();
        assert_eq!(sums, vec![Some(15.0), Some(2.0)]);
        let counts: Vec<Option<i64>> = table
            .df
            .column(COL::POINT_COUNT)?
            .i64()?
            .into_iter()
            .collect();
        assert_eq!(counts, vec![Some(2), Some(1)]);
        Ok(())
    }

    #[test]
    fn export_frame_ranks_selects_and_renames() -> anyhow::Result<()> {
        let merged = df!(
            COL::MUNICIPIO => ["Monterrey", "Apodaca", "García", "Juárez"],
            COL::TOTAL => [Some(30i64), None, Some(7), Some(30)],
            COL::TVIVHAB => [Some(1000i64), Some(500), None, Some(80)]
        )?;
        let export = ExportConfig {
            file: "salud_mayores.csv".into(),
            format: OutputFormat::Csv,
            rank: Some(RankSpec::new(COL::TOTAL, RankOrder::Top, None)),
            columns: vec![COL::TVIVHAB.into(), COL::MUNICIPIO.into()],
            rename: BTreeMap::from([(COL::TVIVHAB.to_string(), "viviendas".to_string())]),
        };
        let df = export_frame(&merged, &export, 2)?;
        assert_eq!(df.get_column_names(), vec!["viviendas", COL::MUNICIPIO]);
        let names: Vec<Option<&str>> = df.column(COL::MUNICIPIO)?.str()?.into_iter().collect();
        assert_eq!(names, vec![Some("Monterrey"), Some("Juárez")]);

        let mut unknown = export.clone();
        unknown.columns.push("pct".into());
        assert!(matches!(
            export_frame(&merged, &unknown, 2),
            Err(MunijoinError::UnknownColumn { column, .. }) if column == "pct"
        ));
        Ok(())
    }
}
