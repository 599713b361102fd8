//! Resolution of input-parameter bindings against upstream outputs and the
//! parameter store.

use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::cloud::{ParameterStore, TemplateParameter};
use crate::config::{BoundParameter, InputBinding};
use crate::error::{Error, Result};

use super::{OutputParameterSet, ResolveError};

/// Resolves bindings to concrete parameter values.
pub struct ParameterResolver {
    store: Arc<dyn ParameterStore>,
}

impl ParameterResolver {
    pub fn new(store: Arc<dyn ParameterStore>) -> Self {
        Self { store }
    }

    /// Resolve one binding.
    ///
    /// Matching bindings read the accumulated outputs, store bindings read
    /// the parameter store decrypted; both fall back to their static value
    /// when the lookup misses. Static values expand `{UUID}` to one fresh
    /// UUID shared by all occurrences in the value.
    pub async fn resolve(
        &self,
        binding: &InputBinding,
        outputs: &OutputParameterSet,
    ) -> std::result::Result<String, ResolveError> {
        match binding {
            InputBinding::Matching { name, fallback } => match outputs.get(name) {
                Some(value) => Ok(value.to_string()),
                None => fallback
                    .clone()
                    .ok_or_else(|| ResolveError::MatchingNotFound(name.clone())),
            },
            InputBinding::Store { field, fallback } => {
                match self.store.get(field, true).await? {
                    Some(value) => Ok(value),
                    None => fallback.clone().ok_or(ResolveError::StoreNotFound),
                }
            }
            InputBinding::Static { value } => Ok(expand_uuid(value)),
        }
    }

    /// Load a parameter file and substitute bound values in place.
    ///
    /// The file is a JSON array of `{ParameterKey, ParameterValue}` objects
    /// and alone decides which parameters the template receives: a binding
    /// whose name matches no file entry contributes nothing and is never
    /// resolved.
    pub async fn resolve_file(
        &self,
        path: &Path,
        bindings: &[BoundParameter],
        outputs: &OutputParameterSet,
    ) -> Result<Vec<TemplateParameter>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Unable to read parameter file {}: {e}",
                path.display()
            ))
        })?;
        let mut parameters: Vec<TemplateParameter> = serde_json::from_str(&content)?;
        self.apply(&mut parameters, bindings, outputs).await?;
        Ok(parameters)
    }

    /// Substitute bound values into a parameter list in place.
    pub async fn apply(
        &self,
        parameters: &mut [TemplateParameter],
        bindings: &[BoundParameter],
        outputs: &OutputParameterSet,
    ) -> Result<()> {
        for bound in bindings {
            let Some(name) = &bound.name else {
                continue;
            };
            let slot = parameters
                .iter_mut()
                .find(|parameter| parameter.parameter_key == *name);
            if let Some(slot) = slot {
                slot.parameter_value = self.resolve(&bound.binding, outputs).await?;
            }
        }
        Ok(())
    }
}

fn expand_uuid(value: &str) -> String {
    if value.contains("{UUID}") {
        value.replace("{UUID}", &Uuid::new_v4().to_string())
    } else {
        value.to_string()
    }
}
