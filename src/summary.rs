// Summary statistics over enriched rows
//
// AlertSummary counts rows per combined severity and per overall category.
// StrataSummary describes each stratum's overall percentile distribution using
// trueno vectors (mean, standard deviation) and aprender (median).

use crate::alert::CombinedSeverity;
use crate::enriched::EnrichedRow;
use crate::percentile::PercentileCategory;
use crate::strata::StratumKey;
use aprender::stats::DescriptiveStats;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use trueno::Vector;

/// Alert counts across a set of rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub by_severity: BTreeMap<CombinedSeverity, usize>,
    pub by_overall_category: BTreeMap<PercentileCategory, usize>,
    /// Rows with at least one threshold violation
    pub threshold_violations: usize,
}

impl AlertSummary {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a EnrichedRow>,
    {
        let mut by_severity: BTreeMap<CombinedSeverity, usize> =
            CombinedSeverity::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_overall_category: BTreeMap<PercentileCategory, usize> =
            PercentileCategory::ALL.iter().map(|c| (*c, 0)).collect();
        let mut total = 0;
        let mut threshold_violations = 0;

        for row in rows {
            total += 1;
            *by_severity.entry(row.combined.combined_severity).or_insert(0) += 1;
            *by_overall_category.entry(row.overall_category).or_insert(0) += 1;
            if row.has_threshold_violation() {
                threshold_violations += 1;
            }
        }

        Self {
            total,
            by_severity,
            by_overall_category,
            threshold_violations,
        }
    }

    pub fn count(&self, severity: CombinedSeverity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    /// Share of rows at `severity`, in percent; 0 for an empty set
    pub fn percentage(&self, severity: CombinedSeverity) -> f64 {
        percent(self.count(severity), self.total)
    }

    pub fn category_count(&self, category: PercentileCategory) -> usize {
        self.by_overall_category.get(&category).copied().unwrap_or(0)
    }

    pub fn category_percentage(&self, category: PercentileCategory) -> f64 {
        percent(self.category_count(category), self.total)
    }

    /// Human-readable block for the text report
    pub fn to_report_string(&self) -> String {
        let mut out = format!("Sessions: {}\n", self.total);
        for severity in CombinedSeverity::ALL.iter().rev() {
            out.push_str(&format!(
                "  {:<6} {:>5} ({:.1}%)\n",
                severity.as_str(),
                self.count(*severity),
                self.percentage(*severity)
            ));
        }
        out.push_str("Overall percentile:\n");
        for category in PercentileCategory::ALL {
            out.push_str(&format!(
                "  {:<17} {:>5} ({:.1}%)\n",
                category.as_str(),
                self.category_count(category),
                self.category_percentage(category)
            ));
        }
        out.push_str(&format!(
            "Threshold violations: {}\n",
            self.threshold_violations
        ));
        out
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}

/// Distribution of overall percentiles within one stratum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StratumStats {
    pub stratum: StratumKey,
    pub subjects: usize,
    pub sessions: usize,
    /// Sessions with a defined overall percentile
    pub ranked_sessions: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
}

/// Per-stratum statistics, ordered by stratum key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrataSummary {
    pub strata: Vec<StratumStats>,
}

impl StrataSummary {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a EnrichedRow>,
    {
        let mut groups: BTreeMap<&StratumKey, (BTreeSet<&str>, usize, Vec<f32>)> = BTreeMap::new();
        for row in rows {
            let (subjects, sessions, overall) = groups.entry(&row.stratum).or_default();
            subjects.insert(row.subject_id.as_str());
            *sessions += 1;
            if let Some(p) = row.overall_percentile {
                overall.push(p as f32);
            }
        }

        let strata = groups
            .into_iter()
            .map(|(stratum, (subjects, sessions, overall))| {
                let (mean, median, std_dev) = describe(&overall);
                StratumStats {
                    stratum: stratum.clone(),
                    subjects: subjects.len(),
                    sessions,
                    ranked_sessions: overall.len(),
                    mean,
                    median,
                    std_dev,
                }
            })
            .collect();

        Self { strata }
    }

    pub fn get(&self, stratum: &StratumKey) -> Option<&StratumStats> {
        self.strata.iter().find(|s| &s.stratum == stratum)
    }
}

fn describe(values: &[f32]) -> (Option<f64>, Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None, None);
    }

    let v = Vector::from_slice(values);
    let mean = v.mean().ok().map(f64::from);
    let std_dev = if values.len() > 1 {
        v.stddev().ok().map(f64::from)
    } else {
        Some(0.0)
    };
    let median = DescriptiveStats::new(&v).quantile(0.5).ok().map(f64::from);
    (mean, median, std_dev)
}
