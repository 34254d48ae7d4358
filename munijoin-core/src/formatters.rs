use std::io::{Cursor, Write};

use anyhow::{anyhow, Result};
use enum_dispatch::enum_dispatch;
use geo::geometry::Geometry;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum_macros::{Display, EnumString};
use wkt::TryFromWkt;

use crate::COL;

/// Utility function to convert from polars `AnyValue` to `serde_json::Value`.
/// Covers the types the merged table can hold.
fn any_value_to_json(value: &AnyValue) -> Result<Value> {
    match value {
        AnyValue::Null => Ok(Value::Null),
        AnyValue::Boolean(b) => Ok(Value::Bool(*b)),
        AnyValue::String(s) => Ok(Value::String((*s).to_string())),
        AnyValue::StringOwned(s) => Ok(Value::String(s.to_string())),
        AnyValue::Int8(n) => Ok(json!(*n)),
        AnyValue::Int16(n) => Ok(json!(*n)),
        AnyValue::Int32(n) => Ok(json!(*n)),
        AnyValue::Int64(n) => Ok(json!(*n)),
        AnyValue::UInt8(n) => Ok(json!(*n)),
        AnyValue::UInt16(n) => Ok(json!(*n)),
        AnyValue::UInt32(n) => Ok(json!(*n)),
        AnyValue::UInt64(n) => Ok(json!(*n)),
        // Non-finite floats have no JSON form and become null
        AnyValue::Float32(n) => Ok(json!(*n)),
        AnyValue::Float64(n) => Ok(json!(*n)),
        other => Err(anyhow!("Failed to convert {other:?} to JSON")),
    }
}

fn parse_geometry(wkt: Option<&str>) -> Result<Option<geojson::Geometry>> {
    wkt.map(|wkt| {
        Geometry::<f64>::try_from_wkt_str(wkt)
            .map(|geom| geojson::Geometry::from(&geom))
            .map_err(|err| anyhow!("Invalid `Geometry<f64>` from well-known text string: {err}"))
    })
    .transpose()
}

/// One GeoJSON feature per row. The geometry column, if present, becomes the feature geometry
/// (null when the row has none) and every other column a property.
fn features(df: &DataFrame) -> Result<Vec<geojson::Feature>> {
    let geometries: Vec<Option<&str>> = match df.column(COL::GEOMETRY) {
        Ok(column) => column.str()?.into_iter().collect(),
        Err(_) => vec![None; df.height()],
    };
    let properties = df
        .get_columns()
        .iter()
        .filter(|c| c.name() != COL::GEOMETRY)
        .collect::<Vec<_>>();

    geometries
        .into_iter()
        .enumerate()
        .map(|(idx, wkt)| -> Result<geojson::Feature> {
            let mut props = serde_json::Map::new();
            for column in &properties {
                props.insert(column.name().to_string(), any_value_to_json(&column.get(idx)?)?);
            }
            Ok(geojson::Feature {
                bbox: None,
                geometry: parse_geometry(wkt)?,
                id: None,
                properties: Some(props),
                foreign_members: None,
            })
        })
        .collect()
}

/// Trait to define different output generators. Defines two
/// functions, format which generates a serialized string of the
/// `DataFrame` and save which writes the same output to a writer
#[enum_dispatch]
pub trait OutputGenerator {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()>;
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let mut data: Vec<u8> = vec![];
        let mut buff = Cursor::new(&mut data);
        self.save(&mut buff, df)?;

        Ok(String::from_utf8(data)?)
    }
}

/// Enum of OutputFormatters one for each potential
/// output type
#[enum_dispatch(OutputGenerator)]
#[derive(Serialize, Deserialize, Debug)]
pub enum OutputFormatter {
    GeoJSON(GeoJSONFormatter),
    GeoJSONSeq(GeoJSONSeqFormatter),
    Csv(CSVFormatter),
}

/// File formats exports can be written in.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    #[strum(serialize = "geojson")]
    GeoJSON,
    #[strum(serialize = "geojsonseq")]
    GeoJSONSeq,
    #[default]
    #[strum(serialize = "csv")]
    Csv,
}

impl From<OutputFormat> for OutputFormatter {
    fn from(value: OutputFormat) -> Self {
        match value {
            OutputFormat::GeoJSON => OutputFormatter::GeoJSON(GeoJSONFormatter),
            OutputFormat::GeoJSONSeq => OutputFormatter::GeoJSONSeq(GeoJSONSeqFormatter),
            OutputFormat::Csv => OutputFormatter::Csv(CSVFormatter),
        }
    }
}

/// Format the results as geojson sequence format
/// This is one line per feature serialized as a
/// geojson feature
#[derive(Serialize, Deserialize, Debug)]
pub struct GeoJSONSeqFormatter;

impl OutputGenerator for GeoJSONSeqFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        for feature in features(df)? {
            writeln!(writer, "{feature}")?;
        }
        Ok(())
    }
}

/// Format the results as a CSV file with a header row. Geometry,
/// when exported, stays as well-known text
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct CSVFormatter;

impl OutputGenerator for CSVFormatter {
    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        CsvWriter::new(writer).include_header(true).finish(df)?;
        Ok(())
    }
}

/// Format the results as a geojson FeatureCollection
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct GeoJSONFormatter;

impl OutputGenerator for GeoJSONFormatter {
    fn format(&self, df: &mut DataFrame) -> Result<String> {
        let feature_collection = geojson::FeatureCollection {
            bbox: None,
            features: features(df)?,
            foreign_members: None,
        };
        Ok(feature_collection.to_string())
    }

    fn save(&self, writer: &mut impl Write, df: &mut DataFrame) -> Result<()> {
        let result = self.format(df)?;
        writer.write_all(result.as_bytes())?;

        Ok(())
    }
}
