//! Resolution of inconsistent source headers onto canonical field names.

use std::collections::HashSet;
use std::path::Path;

use log::debug;
use nonempty::NonEmpty;
use polars::prelude::*;

use crate::config::ColumnSpec;
use crate::error::{MunijoinError, MunijoinResult};
use crate::source::column_names;

impl ColumnSpec {
    /// Accepted spellings, canonical name first.
    pub fn candidates(&self) -> NonEmpty<&str> {
        NonEmpty {
            head: self.canonical.as_str(),
            tail: self.aliases.iter().map(String::as_str).collect(),
        }
    }
}

/// Outcome of reconciling one frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconciled {
    /// `(header found, canonical name)` for every resolved field.
    pub resolved: Vec<(String, String)>,
    /// Optional canonical fields that no header matched.
    pub missing: Vec<String>,
}

/// Index of the first header matching one of `candidates`. Candidate order takes priority over
/// header order, and for each candidate an exact match wins over a case-insensitive one. Headers
/// in `used` are skipped.
pub fn find_header(
    headers: &[String],
    candidates: &NonEmpty<&str>,
    used: &HashSet<usize>,
) -> Option<usize> {
    let free = |idx: &usize| !used.contains(idx);
    candidates.iter().find_map(|candidate| {
        let lowered = candidate.to_lowercase();
        headers
            .iter()
            .position(|header| header.as_str() == *candidate)
            .filter(free)
            .or_else(|| {
                headers
                    .iter()
                    .enumerate()
                    .find(|(idx, header)| free(idx) && header.to_lowercase() == lowered)
                    .map(|(idx, _)| idx)
            })
    })
}

/// Rename the headers of `df` matching each spec to its canonical name.
///
/// A required spec with no matching header fails with
/// [`MunijoinError::MissingRequiredField`], naming `file` and the headers actually present.
/// Optional specs without a match are left absent and listed in [`Reconciled::missing`].
pub fn reconcile(
    df: &mut DataFrame,
    specs: &[ColumnSpec],
    file: &Path,
) -> MunijoinResult<Reconciled> {
    let headers = column_names(df);
    let mut used = HashSet::new();
    let mut reconciled = Reconciled::default();

    for spec in specs {
        match find_header(&headers, &spec.candidates(), &used) {
            Some(idx) => {
                used.insert(idx);
                reconciled
                    .resolved
                    .push((headers[idx].clone(), spec.canonical.clone()));
            }
            None if spec.required => {
                return Err(MunijoinError::MissingRequiredField {
                    field: spec.canonical.clone(),
                    file: file.to_path_buf(),
                    found: headers,
                })
            }
            None => reconciled.missing.push(spec.canonical.clone()),
        }
    }

    for (found, canonical) in &reconciled.resolved {
        if found != canonical {
            debug!("{}: `{found}` -> `{canonical}`", file.display());
            df.rename(found, canonical)?;
        }
    }
    Ok(reconciled)
}
