//! Canonicalization of municipality names into join keys and display names.
//!
//! Two values are derived from every raw name and must not be confused:
//! - the [`MunicipalityKey`], which strips accents, case and spacing and is the only thing
//!   joins compare;
//! - the display name, which keeps accents and is what exports show.

use std::fmt::Display;
use std::sync::OnceLock;

use itertools::Itertools;
use polars::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Normalized string identifying one municipality.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MunicipalityKey(String);

impl MunicipalityKey {
    /// Derive the key from a raw, possibly missing, name.
    pub fn new(raw: Option<&str>) -> Self {
        Self(raw.map(municipality_key).unwrap_or_default())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for MunicipalityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<MunicipalityKey> for String {
    fn from(value: MunicipalityKey) -> Self {
        value.0
    }
}

/// Undo UTF-8 text that was decoded as Latin-1. If every char fits in one byte and those bytes
/// form valid UTF-8, the decoded string is returned; otherwise the input is kept as is.
pub fn fix_mojibake(s: &str) -> String {
    let narrow: Option<Vec<u8>> = s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect();
    narrow
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| s.to_string())
}

/// Join key for a raw name: mojibake repair, compatibility decomposition with diacritics and
/// non-ASCII characters dropped, then lower case with whitespace collapsed and trimmed.
pub fn municipality_key(raw: &str) -> String {
    let repaired = fix_mojibake(raw);
    let ascii: String = repaired
        .nfkd()
        .filter(|c| !is_combining_mark(*c) && c.is_ascii())
        .collect();
    ascii.to_ascii_lowercase().split_whitespace().join(" ")
}

fn parenthesised() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(.*?\)").expect("valid regex"))
}

/// Light cleanup for display: accents are kept, parenthesised fragments and stray punctuation
/// at either end are removed.
pub fn display_name(raw: &str) -> String {
    let repaired = fix_mojibake(raw);
    let composed: String = repaired.nfkc().collect::<String>().replace('\u{a0}', " ");
    let collapsed = composed.split_whitespace().join(" ");
    let trimmed = collapsed.trim_matches(|c: char| " .,_-".contains(c));
    let without_parens = parenthesised().replace_all(trimmed, "");
    without_parens.split_whitespace().join(" ")
}

/// Strip byte-order marks, non-breaking spaces and surrounding whitespace from a header.
pub fn clean_header(header: &str) -> String {
    header
        .replace('\u{feff}', "")
        .replace('\u{a0}', " ")
        .trim()
        .to_string()
}

/// Map a string column to join keys. Nulls become the empty key.
pub fn key_series(s: &Series, name: &str) -> PolarsResult<Series> {
    let s = s.cast(&DataType::String)?;
    let keys: Vec<String> = s
        .str()?
        .into_iter()
        .map(|value| MunicipalityKey::new(value).into())
        .collect();
    Ok(Series::new(name, keys))
}
