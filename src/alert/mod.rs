// Combined alerts: one actionable state per session
//
// Percentile categories and threshold violations are merged with a fixed
// precedence:
//   ALERT  any ALERT percentile, or any critical threshold violation
//   WATCH  any WATCH percentile, or any warning threshold violation
//   NONE   otherwise
//
// The reason list is part of the contract: percentile reasons first in
// feature declaration order, then threshold reasons in rule declaration
// order. The dashboard shows it verbatim, so the order must never depend on
// hashing or timing.

mod combiner;

pub use combiner::{combine, combine_all, CombinedAlert, CombinedSeverity};
