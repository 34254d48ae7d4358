use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::coerce::ValueKind;
use crate::error::{MunijoinError, MunijoinResult};
use crate::formatters::OutputFormat;
use crate::geo::AreaProjection;
use crate::join::Aggregation;
use crate::metrics::DerivedMetric;
use crate::rank::{RankOrder, RankSpec};
use crate::COL;

/// Everything a pipeline run needs: where the inputs are, how to read them, what to derive and
/// what to export. Every field has a default, so a TOML file only needs to name what it changes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory that relative source and boundary paths are resolved against.
    pub data_dir: PathBuf,
    /// Directory that export files are written to.
    pub output_dir: PathBuf,
    pub boundary: BoundaryConfig,
    pub area_projection: AreaProjection,
    /// Slice size used by rankings that do not set their own.
    pub default_slice_size: usize,
    pub sources: Vec<SourceConfig>,
    pub derived: Vec<DerivedMetric>,
    pub exports: Vec<ExportConfig>,
}

/// The polygon dimension every fact source is joined against. Always required.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BoundaryConfig {
    pub path: PathBuf,
    /// Attribute holding the display name. When unset, `name_candidates` are tried in order.
    pub name_column: Option<String>,
    pub name_candidates: Vec<String>,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            path: "municipios.geojson".into(),
            name_column: None,
            name_candidates: COL::BOUNDARY_NAME_CANDIDATES
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

/// A canonical column and the header spellings accepted for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
}

impl ColumnSpec {
    pub fn new(canonical: &str, aliases: &[&str], kind: ValueKind) -> Self {
        Self {
            canonical: canonical.into(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            kind,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Longitude/latitude columns of a point-located source.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocationSpec {
    pub longitude: ColumnSpec,
    pub latitude: ColumnSpec,
}

/// One output field of a fact source: `aggregation` of the canonical input `column`, grouped
/// by municipality.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub aggregation: Aggregation,
}

impl AggregateSpec {
    pub fn new(name: &str, column: &str, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            aggregation,
        }
    }
}

/// A dataset contributing measurements per municipality.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub path: PathBuf,
    /// When set, a missing file aborts the run instead of contributing nulls.
    #[serde(default)]
    pub required: bool,
    /// Column naming the municipality. Exactly one of `municipality` and `location` is set.
    #[serde(default)]
    pub municipality: Option<ColumnSpec>,
    /// Point coordinates assigned to municipalities by containment.
    #[serde(default)]
    pub location: Option<LocationSpec>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    /// Output fields. When empty, every value column is summed under its canonical name.
    #[serde(default)]
    pub aggregates: Vec<AggregateSpec>,
}

impl SourceConfig {
    pub fn output_fields(&self) -> Vec<AggregateSpec> {
        if self.aggregates.is_empty() {
            self.columns
                .iter()
                .map(|c| AggregateSpec::new(&c.canonical, &c.canonical, Aggregation::Sum))
                .collect()
        } else {
            self.aggregates.clone()
        }
    }

    pub fn column(&self, canonical: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.canonical == canonical)
    }
}

/// A file written after the merge: either the whole table or a ranked slice of it, restricted
/// to `columns` in the given order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub rank: Option<RankSpec>,
    pub columns: Vec<String>,
    /// Output header for a column, when it differs from the merged table's name.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
}

impl ExportConfig {
    fn new(file: &str, rank: Option<RankSpec>, columns: &[&str]) -> Self {
        Self {
            file: file.into(),
            format: OutputFormat::Csv,
            rank,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rename: BTreeMap::new(),
        }
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl Config {
    pub fn boundary_path(&self) -> PathBuf {
        resolve(&self.data_dir, &self.boundary.path)
    }

    pub fn source_path(&self, source: &SourceConfig) -> PathBuf {
        resolve(&self.data_dir, &source.path)
    }

    pub fn export_path(&self, export: &ExportConfig) -> PathBuf {
        resolve(&self.output_dir, &export.file)
    }

    /// Columns the merged table will have, in order: dimension columns, source fields in source
    /// order, then derived metrics.
    pub fn merged_columns(&self) -> Vec<String> {
        dimension_columns()
            .into_iter()
            .chain(
                self.sources
                    .iter()
                    .flat_map(|s| s.output_fields().into_iter().map(|f| f.name)),
            )
            .chain(self.derived.iter().map(|d| d.name().to_string()))
            .collect()
    }

    /// Reject configuration that cannot be executed, before any file is read.
    pub fn validate(&self) -> MunijoinResult<()> {
        let invalid = |msg: String| Err(MunijoinError::InvalidConfig(msg));

        if self.default_slice_size == 0 {
            return invalid("`default_slice_size` must be at least 1".into());
        }
        if self.boundary.path.as_os_str().is_empty() {
            return invalid("`boundary.path` is empty".into());
        }

        let mut known: HashSet<String> = dimension_columns().into_iter().collect();
        let mut source_names = HashSet::new();
        for source in &self.sources {
            if !source_names.insert(source.name.as_str()) {
                return invalid(format!("source `{}` is declared twice", source.name));
            }
            match (&source.municipality, &source.location) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return invalid(format!(
                        "source `{}` needs exactly one of `municipality` or `location`",
                        source.name
                    ))
                }
            }
            let key_columns = source.municipality.iter().chain(
                source
                    .location
                    .iter()
                    .flat_map(|l| [&l.longitude, &l.latitude]),
            );
            if key_columns
                .chain(&source.columns)
                .any(|c| c.canonical.trim().is_empty())
            {
                return invalid(format!("source `{}` has an empty column name", source.name));
            }
            let fields = source.output_fields();
            if fields.is_empty() {
                return invalid(format!("source `{}` contributes no fields", source.name));
            }
            for field in fields {
                if source.column(&field.column).is_none() {
                    return invalid(format!(
                        "source `{}` aggregates undeclared column `{}`",
                        source.name, field.column
                    ));
                }
                if !known.insert(field.name.clone()) {
                    return invalid(format!(
                        "field `{}` of source `{}` is already provided by another source",
                        field.name, source.name
                    ));
                }
            }
        }

        for metric in &self.derived {
            if let Some(missing) = metric.inputs().into_iter().find(|c| !known.contains(*c)) {
                return invalid(format!(
                    "derived metric `{}` uses unknown column `{missing}`",
                    metric.name()
                ));
            }
            if !known.insert(metric.name().to_string()) {
                return invalid(format!("derived metric `{}` is declared twice", metric.name()));
            }
        }

        for export in &self.exports {
            if export.columns.is_empty() {
                return invalid(format!("export `{}` has no columns", export.file.display()));
            }
            let referenced = export
                .columns
                .iter()
                .chain(export.rank.as_ref().map(|r| &r.metric));
            if let Some(missing) = referenced.into_iter().find(|c| !known.contains(*c)) {
                return invalid(format!(
                    "export `{}` uses unknown column `{missing}`",
                    export.file.display()
                ));
            }
            if export.rank.as_ref().and_then(|r| r.size) == Some(0) {
                return invalid(format!(
                    "export `{}` ranks zero rows",
                    export.file.display()
                ));
            }
        }
        Ok(())
    }
}

fn dimension_columns() -> Vec<String> {
    [
        COL::MUNICIPIO,
        COL::MUNI_KEY,
        COL::AREA_KM2,
        COL::CENTROID_LON,
        COL::CENTROID_LAT,
        COL::GEOMETRY,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect_vec()
}

const MUNICIPIO_ALIASES: [&str; 4] = ["Municipio", "NOM_MUN", "MUNICIPIO", "nom_mun"];

fn census_columns() -> Vec<ColumnSpec> {
    [
        COL::TVIVHAB,
        COL::TVIVPAR,
        COL::VIVPAR_DES,
        COL::VPH_C_ELEC,
        COL::VPH_S_ELEC,
        COL::VPH_AGUADV,
        COL::VPH_AEASP,
        COL::VPH_AGUAFV,
        COL::VPH_DRENAJ,
        COL::VPH_NODREN,
        COL::VPH_C_SERV,
    ]
    .iter()
    .map(|c| ColumnSpec::new(c, &[], ValueKind::Count))
    .collect()
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            name: "population".into(),
            path: "nuevo_leon_points_by_municipio.csv".into(),
            required: false,
            municipality: Some(ColumnSpec::new("NAME_2", &MUNICIPIO_ALIASES, ValueKind::Count)),
            location: None,
            columns: vec![
                ColumnSpec::new(COL::MEAN_POPULATION_DENSITY, &[], ValueKind::Decimal),
                ColumnSpec::new(COL::SUM_POPULATION_DENSITY, &[], ValueKind::Decimal),
                ColumnSpec::new(COL::POINT_COUNT, &[], ValueKind::Count),
            ],
            aggregates: vec![
                AggregateSpec::new(
                    COL::MEAN_POPULATION_DENSITY,
                    COL::MEAN_POPULATION_DENSITY,
                    Aggregation::Mean,
                ),
                AggregateSpec::new(
                    COL::SUM_POPULATION_DENSITY,
                    COL::SUM_POPULATION_DENSITY,
                    Aggregation::Sum,
                ),
                AggregateSpec::new(COL::POINT_COUNT, COL::POINT_COUNT, Aggregation::Sum),
            ],
        },
        SourceConfig {
            name: "medical_units".into(),
            path: "unidades_medicas_totales.csv".into(),
            required: false,
            municipality: Some(ColumnSpec::new(
                COL::MUNICIPIO,
                &MUNICIPIO_ALIASES,
                ValueKind::Count,
            )),
            location: None,
            columns: vec![ColumnSpec::new(
                COL::TOTAL,
                &["Total", "Total_unidades", "Centros", "Unidades"],
                ValueKind::Count,
            )
            .required()],
            aggregates: vec![],
        },
        SourceConfig {
            name: "census".into(),
            path: "ITER2020 - 19 Nuevo León.csv".into(),
            required: false,
            municipality: Some(ColumnSpec::new("NOM_MUN", &MUNICIPIO_ALIASES, ValueKind::Count)),
            location: None,
            columns: census_columns(),
            aggregates: vec![],
        },
        SourceConfig {
            name: "temperature".into(),
            path: "temperatura_municipios.csv".into(),
            required: false,
            municipality: Some(ColumnSpec::new(
                COL::MUNICIPIO,
                &MUNICIPIO_ALIASES,
                ValueKind::Count,
            )),
            location: None,
            columns: vec![ColumnSpec::new(
                COL::TEMPERATURA_MEDIA,
                &["temperatura", "temp_media"],
                ValueKind::Decimal,
            )],
            aggregates: vec![AggregateSpec::new(
                COL::TEMPERATURA_MEDIA,
                COL::TEMPERATURA_MEDIA,
                Aggregation::Mean,
            )],
        },
        SourceConfig {
            name: "emissions".into(),
            path: "emisiones_municipios.csv".into(),
            required: false,
            municipality: Some(ColumnSpec::new(
                COL::MUNICIPIO,
                &MUNICIPIO_ALIASES,
                ValueKind::Count,
            )),
            location: None,
            columns: vec![ColumnSpec::new(
                COL::EMISIONES_CO2,
                &["emisiones", "co2"],
                ValueKind::Decimal,
            )],
            aggregates: vec![],
        },
        SourceConfig {
            name: "green_space".into(),
            path: "areas_verdes_municipios.csv".into(),
            required: false,
            municipality: Some(ColumnSpec::new(
                COL::MUNICIPIO,
                &MUNICIPIO_ALIASES,
                ValueKind::Count,
            )),
            location: None,
            columns: vec![ColumnSpec::new(
                COL::AREA_VERDE_KM2,
                &["area_verde", "superficie_verde_km2"],
                ValueKind::Decimal,
            )],
            aggregates: vec![],
        },
    ]
}

fn default_derived() -> Vec<DerivedMetric> {
    vec![
        DerivedMetric::density(COL::POP_PER_KM2, COL::SUM_POPULATION_DENSITY),
        DerivedMetric::density(COL::UNIDADES_POR_KM2, COL::TOTAL),
        DerivedMetric::density(COL::EMISIONES_POR_KM2, COL::EMISIONES_CO2),
        DerivedMetric::percentage(COL::PCT_SIN_ELECTRICIDAD, COL::VPH_S_ELEC, COL::TVIVHAB),
        DerivedMetric::percentage(COL::PCT_AREA_VERDE, COL::AREA_VERDE_KM2, COL::AREA_KM2),
    ]
}

fn default_exports() -> Vec<ExportConfig> {
    let mut merged = ExportConfig::new("municipios_merged.geojson", None, &[]);
    merged.format = OutputFormat::GeoJSON;
    merged.columns = dimension_columns()
        .into_iter()
        .chain(default_sources().iter().flat_map(|s| {
            s.output_fields()
                .into_iter()
                .map(|f| f.name)
                .collect_vec()
        }))
        .chain(default_derived().iter().map(|d| d.name().to_string()))
        .collect();

    vec![
        ExportConfig::new(
            "menos_viv.csv",
            Some(RankSpec::new(COL::TVIVHAB, RankOrder::Bottom, Some(5))),
            &[COL::MUNICIPIO, COL::TVIVHAB],
        ),
        ExportConfig::new(
            "top10_electricidad.csv",
            Some(RankSpec::new(COL::PCT_SIN_ELECTRICIDAD, RankOrder::Top, Some(10))),
            &[COL::MUNICIPIO, COL::PCT_SIN_ELECTRICIDAD],
        ),
        ExportConfig::new(
            "salud_menores.csv",
            Some(RankSpec::new(COL::TOTAL, RankOrder::Bottom, None)),
            &[COL::MUNICIPIO, COL::TOTAL, COL::TVIVHAB],
        ),
        ExportConfig::new(
            "salud_mayores.csv",
            Some(RankSpec::new(COL::TOTAL, RankOrder::Top, None)),
            &[COL::MUNICIPIO, COL::TOTAL, COL::TVIVHAB],
        ),
        ExportConfig::new(
            "salud_con_tvivhab.csv",
            None,
            &[COL::MUNICIPIO, COL::TOTAL, COL::TVIVHAB],
        ),
        ExportConfig::new(
            "nuevo_leon_points_by_municipio_summary.csv",
            None,
            &[
                COL::MUNICIPIO,
                COL::MUNI_KEY,
                COL::AREA_KM2,
                COL::POINT_COUNT,
                COL::SUM_POPULATION_DENSITY,
                COL::MEAN_POPULATION_DENSITY,
                COL::POP_PER_KM2,
            ],
        ),
        merged,
    ]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: ".".into(),
            output_dir: "data".into(),
            boundary: BoundaryConfig::default(),
            area_projection: AreaProjection::default(),
            default_slice_size: 5,
            sources: default_sources(),
            derived: default_derived(),
            exports: default_exports(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok(), "{:?}", config.validate());
    }

    #[test]
    fn merged_columns_start_with_dimension_and_end_with_derived() {
        let columns = Config::default().merged_columns();
        assert_eq!(columns[0], COL::MUNICIPIO);
        assert_eq!(columns[1], COL::MUNI_KEY);
        assert_eq!(columns.last().map(String::as_str), Some(COL::PCT_AREA_VERDE));
        assert!(columns.iter().any(|c| c == COL::TOTAL));
    }

    #[test]
    fn duplicate_fields_across_sources_are_rejected() {
        let mut config = Config::default();
        let mut duplicate = config.sources[1].clone();
        duplicate.name = "medical_units_2024".into();
        config.sources.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("`Total`"), "{err}");
    }

    #[test]
    fn export_of_unknown_column_is_rejected() {
        let mut config = Config::default();
        config.exports[0].columns.push("not_a_column".into());
        assert!(matches!(
            config.validate(),
            Err(MunijoinError::InvalidConfig(_))
        ));
    }

    #[test]
    fn source_needs_exactly_one_key() {
        let mut config = Config::default();
        config.sources[0].municipality = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_column_name_is_rejected() {
        let mut config = Config::default();
        config.sources[2].columns[0].canonical = " ".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("`census`"), "{err}");
    }

    #[test]
    fn partial_config_keeps_defaults() -> anyhow::Result<()> {
        let config: Config =
            serde_json::from_str(r#"{"data_dir": "/tmp/nl", "default_slice_size": 10}"#)?;
        assert_eq!(config.data_dir, PathBuf::from("/tmp/nl"));
        assert_eq!(config.default_slice_size, 10);
        assert_eq!(config.sources, Config::default().sources);
        assert_eq!(
            config.boundary_path(),
            PathBuf::from("/tmp/nl/municipios.geojson")
        );
        Ok(())
    }
}
