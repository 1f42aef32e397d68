use crate::measurement::{MeasurementTable, SessionKey};
use crate::strata::StratumKey;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Sessions grouped by stratum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Strata {
    groups: BTreeMap<StratumKey, BTreeSet<SessionKey>>,
}

impl Strata {
    /// Sessions in one stratum, ordered by session key
    pub fn sessions(&self, key: &StratumKey) -> Option<&BTreeSet<SessionKey>> {
        self.groups.get(key)
    }

    /// Every bucket, the unstratified one included (it sorts last)
    pub fn iter(&self) -> impl Iterator<Item = (&StratumKey, &BTreeSet<SessionKey>)> {
        self.groups.iter()
    }

    /// Strata usable as comparison populations
    pub fn ranked(&self) -> impl Iterator<Item = (&StratumKey, &BTreeSet<SessionKey>)> {
        self.groups.iter().filter(|(key, _)| key.is_stratified())
    }

    pub fn unstratified(&self) -> Option<&BTreeSet<SessionKey>> {
        self.groups.get(&StratumKey::Unstratified)
    }

    /// Number of real strata (the unstratified bucket is not counted)
    pub fn len(&self) -> usize {
        self.ranked().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group every session of the table by its stratum key
pub fn stratify(table: &MeasurementTable) -> Strata {
    let mut groups: BTreeMap<StratumKey, BTreeSet<SessionKey>> = BTreeMap::new();
    for session in table.sessions() {
        groups
            .entry(session.stratum.clone())
            .or_default()
            .insert(session.key.clone());
    }

    let strata = Strata { groups };
    debug!(
        "Stratified {} sessions into {} strata ({} unstratified)",
        table.len(),
        strata.len(),
        strata.unstratified().map_or(0, BTreeSet::len)
    );
    strata
}
