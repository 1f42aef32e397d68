use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Accepted values per field
///
/// An absent field is unconstrained; a field mapped to an empty set matches
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterCriteria {
    fields: BTreeMap<String, BTreeSet<String>>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `values` for `field`, replacing any previous constraint
    pub fn with<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .insert(field.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Add accepted values to a field, creating the constraint if needed
    pub fn accept<I, S>(&mut self, field: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
    }

    /// Drop the constraint on a field
    pub fn remove(&mut self, field: &str) -> Option<BTreeSet<String>> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&BTreeSet<String>> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a `field=v1,v2` expression into a single-field criteria
    ///
    /// `field=` accepts nothing. Values are trimmed; empty items are dropped.
    pub fn from_expr(expr: &str) -> Result<Self> {
        let Some((field, values)) = expr.split_once('=') else {
            bail!(
                "Invalid filter expression: {}. Expected format: FIELD=VALUE[,VALUE...]",
                expr
            );
        };

        let field = field.trim();
        if field.is_empty() {
            bail!("Invalid filter expression: {}. Field name is empty", expr);
        }

        let values = values
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty());
        Ok(Self::new().with(field, values))
    }

    /// Parse several expressions; repeated fields accept the union of their values
    pub fn from_exprs<I, S>(exprs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut criteria = Self::new();
        for expr in exprs {
            for (field, values) in Self::from_expr(expr.as_ref())?.fields {
                criteria.accept(field, values);
            }
        }
        Ok(criteria)
    }
}
