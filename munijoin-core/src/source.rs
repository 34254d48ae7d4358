//! Loading of delimited-text sources into uniform, all-string data frames.

use std::collections::HashSet;
use std::path::Path;

use log::{debug, info, warn};
use polars::prelude::*;

use crate::error::MunijoinResult;
use crate::normalize::clean_header;

/// Read a delimited-text table with every column kept as text. Returns `Ok(None)` when the
/// file does not exist; whether that is fatal is up to the caller.
pub fn load_table<P: AsRef<Path>>(path: P) -> MunijoinResult<Option<DataFrame>> {
    let path = path.as_ref();
    if !path.exists() {
        info!("Source {} is absent", path.display());
        return Ok(None);
    }
    info!("Attempting to load table from {}", path.display());
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        // Zero inference rows keeps every column as String; coercion happens later per field
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    clean_headers(&mut df)?;
    debug!("Loaded {} with shape {:?}", path.display(), df.shape());
    Ok(Some(df))
}

/// `name` with the first `_2`, `_3`, ... suffix not in `taken`.
fn suffixed(name: &str, taken: &HashSet<String>) -> String {
    let mut n = 2;
    loop {
        let candidate = format!("{name}_{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Strip byte-order marks, non-breaking spaces and surrounding whitespace from every header.
/// Headers that become equal after cleaning keep the first occurrence as is and suffix the rest.
pub fn clean_headers(df: &mut DataFrame) -> PolarsResult<()> {
    let mut taken = HashSet::new();
    let cleaned: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| {
            let mut cleaned = clean_header(name);
            if taken.contains(&cleaned) {
                let renamed = suffixed(&cleaned, &taken);
                warn!("Header `{cleaned}` appears more than once; renamed to `{renamed}`");
                cleaned = renamed;
            }
            taken.insert(cleaned.clone());
            cleaned
        })
        .collect();
    df.set_column_names(&cleaned)
}

/// Headers of a frame as owned strings.
pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn missing_file_is_absent_not_an_error() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let loaded = load_table(dir.path().join("nope.csv"))?;
        assert!(loaded.is_none(), "A missing file should be reported as absent");
        Ok(())
    }

    #[test]
    fn headers_are_cleaned_and_values_kept_as_text() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("units.csv");
        fs::write(
            &path,
            "\u{feff}Municipio, Total\u{a0}\nApodaca,\"1,204\"\nGarcía,17\n",
        )?;
        let df = load_table(&path)?.expect("file exists");
        assert_eq!(column_names(&df), vec!["Municipio", "Total"]);
        assert_eq!(df.shape(), (2, 2));
        assert_eq!(df.column("Total")?.dtype(), &DataType::String);
        let totals: Vec<Option<&str>> = df.column("Total")?.str()?.into_iter().collect();
        assert_eq!(totals, vec![Some("1,204"), Some("17")]);
        Ok(())
    }

    #[test]
    fn headers_equal_after_cleaning_are_suffixed() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("units.csv");
        fs::write(
            &path,
            "Municipio,Total,Total\u{a0},Total_2\nApodaca,3,4,5\n",
        )?;
        let df = load_table(&path)?.expect("file exists");
        assert_eq!(
            column_names(&df),
            vec!["Municipio", "Total", "Total_2", "Total_2_2"]
        );
        let second: Vec<Option<&str>> = df.column("Total_2")?.str()?.into_iter().collect();
        assert_eq!(second, vec![Some("4")]);
        Ok(())
    }
}
