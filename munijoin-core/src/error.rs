//! Error types.

use std::path::PathBuf;

/// Fatal conditions of a pipeline run. Everything recoverable (absent optional source,
/// unparseable cell, join miss, broken geometry) degrades to null instead.
#[derive(thiserror::Error, Debug)]
pub enum MunijoinError {
    #[error("Required field `{field}` not found in {}. Columns found: {found:?}", file.display())]
    MissingRequiredField {
        field: String,
        file: PathBuf,
        found: Vec<String>,
    },
    #[error("Boundary file not found: {}", .0.display())]
    MissingBoundaryFile(PathBuf),
    #[error("Required source `{source_name}` not found at {}", path.display())]
    MissingRequiredSource { source_name: String, path: PathBuf },
    #[error("Column `{column}` is not in the table. Available columns: {available:?}")]
    UnknownColumn {
        column: String,
        available: Vec<String>,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unsupported boundary file format: {}", .0.display())]
    UnsupportedBoundaryFormat(PathBuf),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Wrapped GeoJSON error: {0}")]
    GeoJsonError(#[from] geojson::Error),
    #[error("Wrapped FlatGeobuf error: {0}")]
    FlatGeobufError(#[from] flatgeobuf::Error),
    #[error("Wrapped geozero error: {0}")]
    GeozeroError(#[from] geozero::error::GeozeroError),
}

pub type MunijoinResult<T> = Result<T, MunijoinError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_field_names_field_file_and_columns() {
        let err = MunijoinError::MissingRequiredField {
            field: "Municipio".into(),
            file: PathBuf::from("data/unidades.csv"),
            found: vec!["Clave".into(), "Total".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("`Municipio`"));
        assert!(msg.contains("data/unidades.csv"));
        assert!(msg.contains("\"Clave\", \"Total\""));
    }
}
