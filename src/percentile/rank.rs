/// Raw leave-one-out rank of one session, before any policy is applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawRank {
    /// No usable value for the feature
    Missing,
    /// A value, but no other session in the stratum has one
    Isolated,
    /// Mid-rank percentile against `population` other values
    Ranked { percentile: f64, population: usize },
}

impl RawRank {
    pub fn percentile(&self) -> Option<f64> {
        match self {
            RawRank::Ranked { percentile, .. } => Some(*percentile),
            RawRank::Missing | RawRank::Isolated => None,
        }
    }

    pub fn population(&self) -> usize {
        match self {
            RawRank::Ranked { population, .. } => *population,
            RawRank::Missing | RawRank::Isolated => 0,
        }
    }
}

/// Mid-rank percentile of `value` within `population`
///
/// Non-finite population entries are ignored. Returns None for a non-finite
/// value or an empty population.
///
/// # Example
/// ```
/// use stratarank::percentile::percentile_rank;
///
/// assert_eq!(percentile_rank(5.0, &[2.0, 8.0]), Some(50.0));
/// assert_eq!(percentile_rank(5.0, &[5.0, 5.0]), Some(50.0));
/// assert_eq!(percentile_rank(1.0, &[]), None);
/// ```
pub fn percentile_rank(value: f64, population: &[f64]) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }

    let mut size = 0usize;
    let mut below = 0usize;
    let mut equal = 0usize;
    for p in population.iter().filter(|p| p.is_finite()) {
        size += 1;
        if *p < value {
            below += 1;
        } else if *p == value {
            equal += 1;
        }
    }

    if size == 0 {
        return None;
    }
    Some(100.0 * (below as f64 + 0.5 * equal as f64) / size as f64)
}

/// Leave-one-out ranks for a whole column of one stratum
///
/// The column is sorted once; each rank is two binary searches. The session's
/// own value is removed from the tie count and from the population size, which
/// gives the same result as [`percentile_rank`] against everyone else.
pub fn leave_one_out_ranks(values: &[Option<f64>]) -> Vec<RawRank> {
    let mut sorted: Vec<f64> = values
        .iter()
        .filter_map(|v| v.filter(|x| x.is_finite()))
        .collect();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();

    values
        .iter()
        .map(|v| match v.filter(|x| x.is_finite()) {
            None => RawRank::Missing,
            Some(_) if n <= 1 => RawRank::Isolated,
            Some(x) => {
                let below = sorted.partition_point(|p| *p < x);
                let not_above = sorted.partition_point(|p| *p <= x);
                // one of the equal values is the session itself
                let equal = not_above - below - 1;
                let population = n - 1;
                RawRank::Ranked {
                    percentile: 100.0 * (below as f64 + 0.5 * equal as f64) / population as f64,
                    population,
                }
            }
        })
        .collect()
}
