//! Folding stack outputs into the accumulated parameter set.

use std::sync::Arc;

use crate::cloud::{CloudFactory, CredentialBroker, ParameterStore, StackOutput};
use crate::conditions::ConditionEvaluator;
use crate::config::OutputMapping;
use crate::error::Result;

use super::OutputParameterSet;

/// Applies output mappings and the copy-through default.
///
/// Every stack output lands in the accumulated set one way or another: a
/// mapping whose gate passes inserts it under the mapped name (and may
/// mirror it to the parameter store); an output no passing mapping claimed
/// is copied through under its own name. Values are trimmed on insert,
/// store writes keep the raw value.
pub struct OutputParameterMapper {
    factory: Arc<dyn CloudFactory>,
    broker: Arc<CredentialBroker>,
}

impl OutputParameterMapper {
    pub fn new(factory: Arc<dyn CloudFactory>, broker: Arc<CredentialBroker>) -> Self {
        Self { factory, broker }
    }

    /// Fold one stack's outputs into the set.
    pub async fn process_outputs(
        &self,
        evaluator: &ConditionEvaluator,
        stack_outputs: &[StackOutput],
        mappings: &[OutputMapping],
        unit_store: &Arc<dyn ParameterStore>,
        outputs: &mut OutputParameterSet,
    ) -> Result<()> {
        for output in stack_outputs {
            let mut mapped = false;
            for mapping in mappings
                .iter()
                .filter(|mapping| mapping.parameter_name == output.key)
            {
                mapped |= self
                    .apply_mapping(
                        evaluator,
                        &output.key,
                        &output.value,
                        mapping,
                        unit_store,
                        outputs,
                    )
                    .await?;
            }
            if !mapped {
                outputs.insert(&output.key, output.value.trim());
            }
        }
        Ok(())
    }

    /// Apply one mapping to one value; returns whether the mapping's gate
    /// passed. Also used for values extracted from command results.
    pub async fn apply_mapping(
        &self,
        evaluator: &ConditionEvaluator,
        name: &str,
        value: &str,
        mapping: &OutputMapping,
        unit_store: &Arc<dyn ParameterStore>,
        outputs: &mut OutputParameterSet,
    ) -> Result<bool> {
        if !evaluator.should_execute(mapping.condition.as_deref())? {
            return Ok(false);
        }

        if let Some(field) = &mapping.parameter_store_field_name {
            let store = match mapping.role.as_deref() {
                Some(role) => {
                    let token = self.broker.assume(Some(role)).await?;
                    self.factory.parameter_store(token.as_ref())
                }
                None => unit_store.clone(),
            };
            self.write_store_field(&store, field, value, mapping).await?;
        }

        let target = mapping.map_parameter_name.as_deref().unwrap_or(name);
        outputs.insert(target, value.trim());
        Ok(true)
    }

    /// Write a value to the store unless the stored value already matches
    /// (compared trimmed).
    async fn write_store_field(
        &self,
        store: &Arc<dyn ParameterStore>,
        field: &str,
        value: &str,
        mapping: &OutputMapping,
    ) -> Result<()> {
        let stored = store.get(field, true).await?;
        let current = match &stored {
            Some(existing) => existing.trim() == value.trim(),
            None => false,
        };
        if current {
            tracing::debug!("Parameter store field {field} is already current");
            return Ok(());
        }

        tracing::debug!(
            "{} parameter store field {field}",
            if stored.is_some() { "Updating" } else { "Creating" }
        );
        store
            .put(
                field,
                value,
                mapping.parameter_store_field_type,
                &mapping.description,
                true,
            )
            .await?;
        Ok(())
    }
}
