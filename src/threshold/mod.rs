// Threshold rules: absolute bounds on feature values
//
// Rules are static configuration, independent of percentiles. A feature may
// carry several rules; each is evaluated on its own and every violation is
// kept. A missing value never violates a rule, so gaps in upstream data do not
// raise alarms.

mod evaluator;
mod rule;

pub use evaluator::{evaluate, ThresholdAlert, ThresholdEvaluator};
pub use rule::{ThresholdRule, ThresholdSeverity};
