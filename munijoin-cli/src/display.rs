use comfy_table::{presets::NOTHING, *};
use munijoin::coerce::ColumnQuality;
use munijoin::join::SourceCoverage;
use munijoin::normalize::{display_name, municipality_key};
use munijoin::COL;
use polars::prelude::{AnyValue, DataFrame};

fn new_table<T: Into<Cell>>(header: impl IntoIterator<Item = T>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .into_iter()
                .map(|h| Into::<Cell>::into(h).add_attribute(Attribute::Bold)),
        )
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn cell_text(value: &AnyValue) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        AnyValue::Float64(v) => format!("{v:.2}"),
        AnyValue::Float32(v) => format!("{v:.2}"),
        other => other.to_string(),
    }
}

/// Show every column except the geometry, one row per table row.
pub fn display_dataframe(df: &DataFrame) -> anyhow::Result<()> {
    let columns: Vec<_> = df
        .get_columns()
        .iter()
        .filter(|c| c.name() != COL::GEOMETRY)
        .collect();
    let mut table = new_table(columns.iter().map(|c| c.name().to_string()));
    for idx in 0..df.height() {
        let row = columns
            .iter()
            .map(|c| c.get(idx).map(|v| cell_text(&v)))
            .collect::<Result<Vec<_>, _>>()?;
        table.add_row(row);
    }
    let numeric = columns.iter().enumerate().filter(|(_, c)| c.dtype().is_numeric());
    for (idx, _) in numeric {
        if let Some(column) = table.column_mut(idx) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    println!("\n{table}");
    Ok(())
}

pub fn display_coverage(coverage: &[SourceCoverage]) {
    let mut table = new_table([
        "Source",
        "Status",
        "Rows read",
        "Keys",
        "Matched",
        "Municipalities without data",
        "Unmatched keys",
    ]);
    for source in coverage {
        table.add_row(vec![
            source.source.clone(),
            source.status.to_string(),
            source.rows_read.to_string(),
            source.distinct_keys.to_string(),
            source.matched_keys.to_string(),
            source.dimension_rows_unmatched.to_string(),
            source.unmatched_keys.join(", "),
        ]);
    }
    println!("\n{table}");
}

pub fn display_quality(quality: &[ColumnQuality]) {
    let mut table = new_table(["Source", "Column", "Non-empty", "Unparseable", "Lossy"]);
    for column in quality {
        table.add_row(vec![
            column.source.clone(),
            column.column.clone(),
            column.non_empty.to_string(),
            column.nulls_introduced.to_string(),
            column.lossy.to_string(),
        ]);
    }
    println!("\n{table}");
}

pub fn display_normalized(names: &[String]) {
    let mut table = new_table(["Input", "Display name", "Key"]);
    for name in names {
        table.add_row(vec![
            format!("{name:?}"),
            display_name(name),
            municipality_key(name),
        ]);
    }
    println!("\n{table}");
}

/// Cleaned headers of a loaded file with their non-null counts.
pub fn display_headers(df: &DataFrame) {
    let mut table = new_table(["Column", "Non-null", "First value"]);
    for column in df.get_columns() {
        let first = column
            .get(0)
            .map(|v| cell_text(&v))
            .unwrap_or_default();
        table.add_row(vec![
            column.name().to_string(),
            (column.len() - column.null_count()).to_string(),
            first,
        ]);
    }
    println!("\n{table}");
}
