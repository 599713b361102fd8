//! Parameter flow between deployment units
//!
//! Outputs of every executed stack accumulate in an [`OutputParameterSet`];
//! downstream units consume them through input-parameter bindings and
//! reshape them through output mappings. The resolver turns bindings into
//! concrete values; the mapper folds stack outputs back into the set and
//! mirrors selected values to the parameter store.

pub mod mapper;
pub mod resolver;

pub use mapper::OutputParameterMapper;
pub use resolver::ParameterResolver;

use std::collections::BTreeMap;
use thiserror::Error;

use crate::cloud::RemoteError;

/// Errors from resolving an input-parameter binding.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A matching binding named an output no upstream stack published, and
    /// no fallback was configured.
    #[error("Matching Parameter not found ({0}).")]
    MatchingNotFound(String),

    /// A store binding named an absent key and no fallback was configured.
    #[error("Parameter not found.")]
    StoreNotFound,

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// The accumulated output parameters of one deployment pass.
///
/// The primary unit fills the initial set; each group pass starts from a
/// copy of it, so groups never see each other's outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputParameterSet {
    values: BTreeMap<String, String>,
}

impl OutputParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
