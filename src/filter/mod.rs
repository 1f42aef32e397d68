// Multi-field, multi-value selection over enriched rows
//
// Criteria map a field name to a set of accepted values. A row matches when,
// for every constrained field, its value is in the accepted set (AND across
// fields, OR within a field). Faceted counts for a field apply every other
// field's constraint but not its own, so a badge still shows how many rows a
// value would add if it were selected.

mod criteria;
mod engine;

pub use criteria::FilterCriteria;
pub use engine::{apply, count_per_value, FilterError, FilterTable};
