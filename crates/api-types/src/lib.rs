//! Shared API type definitions
//!
//! This crate contains the data model shared by the reaper and the watchdog
//! client: resource kinds, label filters and the default identifying labels
//! stamped on every resource this process creates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Filter key understood by the prune API.
pub const LABEL_FILTER_KEY: &str = "label";

/// Label marking a resource as created by a reaper-aware process.
pub const MANAGED_LABEL: &str = "reaper.managed";

/// Label carrying the per-process session id.
pub const SESSION_ID_LABEL: &str = "reaper.session-id";

/// Session id of the current process, generated once.
pub static SESSION_ID: LazyLock<String> = LazyLock::new(|| Uuid::new_v4().to_string());

/// Labels stamped onto every resource created by this process.
pub fn default_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (SESSION_ID_LABEL.to_string(), SESSION_ID.clone()),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Container,
    Network,
    Image,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Container => f.write_str("container"),
            ResourceKind::Network => f.write_str("network"),
            ResourceKind::Image => f.write_str("image"),
        }
    }
}

/// A resource registered for cleanup.
///
/// `label` is informational (usually the image name) and only shows up in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRegistration {
    pub id: String,
    pub kind: ResourceKind,
    pub label: String,
}

impl ResourceRegistration {
    pub fn new(id: impl Into<String>, kind: ResourceKind, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            label: label.into(),
        }
    }

    /// A registration labelled with its own ID.
    pub fn unlabelled(id: impl Into<String>, kind: ResourceKind) -> Self {
        let id = id.into();
        Self::new(id.clone(), kind, id)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter clause key must not be empty")]
    EmptyKey,
    #[error("label filter key must not be empty (value `{value}`)")]
    EmptyLabelKey { value: String },
}

/// A single `key=value` filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FilterClause {
    key: String,
    value: String,
}

impl FilterClause {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Result<Self, FilterError> {
        let key = key.into();
        if key.is_empty() {
            return Err(FilterError::EmptyKey);
        }
        Ok(Self {
            key,
            value: value.into(),
        })
    }

    /// Builds a `label` clause matching resources that carry `label_key=label_value`.
    pub fn label(label_key: &str, label_value: &str) -> Result<Self, FilterError> {
        if label_key.is_empty() {
            return Err(FilterError::EmptyLabelKey {
                value: label_value.to_string(),
            });
        }
        Self::new(LABEL_FILTER_KEY, format!("{label_key}={label_value}"))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_label(&self) -> bool {
        self.key == LABEL_FILTER_KEY
    }
}

/// Ordered clauses, all of which must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterSet {
    clauses: Vec<FilterClause>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a filter set with one `label` clause per entry, in iteration order.
    pub fn from_labels<'a, I>(labels: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let clauses = labels
            .into_iter()
            .map(|(key, value)| FilterClause::label(key, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses })
    }

    /// Filter set matching everything stamped with [`default_labels`].
    pub fn default_labels() -> Self {
        let labels = default_labels();
        Self {
            clauses: labels
                .iter()
                .map(|(key, value)| FilterClause {
                    key: LABEL_FILTER_KEY.to_string(),
                    value: format!("{key}={value}"),
                })
                .collect(),
        }
    }

    pub fn with_clause(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn push(&mut self, clause: FilterClause) {
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[FilterClause] {
        &self.clauses
    }

    /// Values of the `label` clauses, in the form the prune API expects.
    pub fn label_values(&self) -> Vec<String> {
        self.clauses
            .iter()
            .filter(|clause| clause.is_label())
            .map(|clause| clause.value.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }
}

impl From<Vec<FilterClause>> for FilterSet {
    fn from(clauses: Vec<FilterClause>) -> Self {
        Self { clauses }
    }
}

impl<'a> IntoIterator for &'a FilterSet {
    type Item = &'a FilterClause;
    type IntoIter = std::slice::Iter<'a, FilterClause>;

    fn into_iter(self) -> Self::IntoIter {
        self.clauses.iter()
    }
}
