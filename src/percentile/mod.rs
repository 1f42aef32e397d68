// Percentile ranking within strata
//
// Each session's feature value is ranked against the other sessions of its
// stratum using the mid-rank convention:
//
//   percentile = 100 * (count(p < v) + 0.5 * count(p == v)) / |population|
//
// Ties share the mean rank, so a cohort of identical values sits at the 50th
// percentile instead of being pushed to either extreme. The session itself is
// left out of its population (leave-one-out).
//
// A stratum/feature column is sorted once and every rank is derived by binary
// search, keeping recomputation at O(n log n) for the largest cohorts.

mod category;
mod engine;
mod rank;

pub use category::{CategoryCutPoints, InsufficientReason, PercentileCategory};
pub use engine::{PercentileEngine, PercentileResult, RankedColumn};
pub use rank::{leave_one_out_ranks, percentile_rank, RawRank};
