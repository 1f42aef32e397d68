use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved name of the bucket for sessions without a usable stratum key
pub const UNSTRATIFIED: &str = "UNSTRATIFIED";

/// Stratum a session belongs to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StratumKey {
    Stratified(String),
    Unstratified,
}

impl StratumKey {
    /// Interpret a raw key: missing, blank, or the reserved name all mean unstratified
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(key) if !key.is_empty() && key != UNSTRATIFIED => {
                StratumKey::Stratified(key.to_string())
            }
            _ => StratumKey::Unstratified,
        }
    }

    pub fn is_stratified(&self) -> bool {
        matches!(self, StratumKey::Stratified(_))
    }

    /// The key text for stratified sessions
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StratumKey::Stratified(key) => Some(key),
            StratumKey::Unstratified => None,
        }
    }
}

impl fmt::Display for StratumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StratumKey::Stratified(key) => f.write_str(key),
            StratumKey::Unstratified => f.write_str(UNSTRATIFIED),
        }
    }
}

impl Serialize for StratumKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Which metadata fields compose the stratum key
///
/// # Example TOML
/// ```toml
/// [stratum]
/// fields = ["curriculum", "stage", "version"]
/// separator = "_"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratumKeySpec {
    /// Metadata field names, in key order
    pub fields: Vec<String>,

    /// Joins the field values into one key
    pub separator: String,
}

impl Default for StratumKeySpec {
    fn default() -> Self {
        Self {
            fields: vec!["task".to_string(), "stage".to_string()],
            separator: "_".to_string(),
        }
    }
}

impl StratumKeySpec {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Compose the key for one session's metadata
    ///
    /// Any missing or blank component makes the whole key unusable.
    pub fn key_for(&self, metadata: &BTreeMap<String, String>) -> StratumKey {
        if self.fields.is_empty() {
            return StratumKey::Unstratified;
        }

        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match metadata.get(field).map(|v| v.trim()) {
                Some(value) if !value.is_empty() => parts.push(value),
                _ => return StratumKey::Unstratified,
            }
        }

        StratumKey::from_raw(Some(&parts.join(self.separator.as_str())))
    }
}
