// Stratification: grouping sessions into comparison cohorts
//
// A stratum is the set of sessions sharing a task/stage identity. Percentiles
// are only ever computed inside one stratum, so the key must come from session
// metadata and never from a ranked feature value.
//
// Sessions whose key is missing or malformed land in the reserved
// unstratified bucket. They still get threshold checks but are never ranked
// and never serve as a comparison population.

mod engine;
mod key;

pub use engine::{stratify, Strata};
pub use key::{StratumKey, StratumKeySpec, UNSTRATIFIED};

#[cfg(test)]
mod tests;
