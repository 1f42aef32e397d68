use crate::filter::criteria::FilterCriteria;
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter field '{field}'")]
    InvalidFilterField { field: String },
}

/// Row source the filter engine can select from
pub trait FilterTable {
    type Row;

    fn rows(&self) -> &[Self::Row];

    /// Whether `field` is a known column of this table
    fn has_field(&self, field: &str) -> bool;

    /// Value of `field` for `row`; None when the row has no value
    fn field_value<'r>(&self, row: &'r Self::Row, field: &str) -> Option<Cow<'r, str>>;
}

fn check_field<T: FilterTable + ?Sized>(table: &T, field: &str) -> Result<(), FilterError> {
    if table.has_field(field) {
        Ok(())
    } else {
        Err(FilterError::InvalidFilterField {
            field: field.to_string(),
        })
    }
}

fn row_matches<T: FilterTable + ?Sized>(
    table: &T,
    row: &T::Row,
    criteria: &FilterCriteria,
    skip: Option<&str>,
) -> bool {
    criteria
        .iter()
        .filter(|(field, _)| Some(*field) != skip)
        .all(|(field, accepted)| match table.field_value(row, field) {
            Some(value) => accepted.contains(&*value),
            None => false,
        })
}

/// Rows matching every constraint, in table order
///
/// # Errors
/// `InvalidFilterField` if a criteria field is not a column of the table.
pub fn apply<'t, T: FilterTable + ?Sized>(
    table: &'t T,
    criteria: &FilterCriteria,
) -> Result<Vec<&'t T::Row>, FilterError> {
    for field in criteria.fields() {
        check_field(table, field)?;
    }

    let rows: Vec<&T::Row> = table
        .rows()
        .iter()
        .filter(|row| row_matches(table, row, criteria, None))
        .collect();

    debug!(
        "Filter kept {} of {} rows ({} constrained fields)",
        rows.len(),
        table.rows().len(),
        criteria.fields().count()
    );
    Ok(rows)
}

/// Faceted counts of each value of `field`
///
/// Every other field's constraint applies; `field`'s own does not. Rows with
/// no value for `field` are not counted.
///
/// # Errors
/// `InvalidFilterField` if `field` or a criteria field is not a column.
pub fn count_per_value<T: FilterTable + ?Sized>(
    table: &T,
    criteria: &FilterCriteria,
    field: &str,
) -> Result<BTreeMap<String, usize>, FilterError> {
    check_field(table, field)?;
    for constrained in criteria.fields() {
        check_field(table, constrained)?;
    }

    let mut counts = BTreeMap::new();
    for row in table.rows() {
        if !row_matches(table, row, criteria, Some(field)) {
            continue;
        }
        if let Some(value) = table.field_value(row, field) {
            *counts.entry(value.into_owned()).or_insert(0) += 1;
        }
    }
    Ok(counts)
}
