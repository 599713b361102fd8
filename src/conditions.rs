//! Gate evaluation for deployment units and mappings
//!
//! Three kinds of gate decide whether a unit or mapping runs: a named
//! boolean condition from the plan's condition table, a value check against
//! the accumulated output parameters, and a region gate against the
//! effective deployment region. All three are evaluated through one
//! [`ConditionEvaluator`] so every call site fails the same way on a
//! missing table or a misspelled condition name.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::params::OutputParameterSet;

/// Region constraint on a unit or command mapping.
///
/// `require` passes only in the named region; `exclude` passes everywhere
/// except the named region. Setting both is a configuration error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionGate {
    #[serde(default)]
    pub require: Option<String>,

    #[serde(default)]
    pub exclude: Option<String>,

    /// Run the unit read-only instead of skipping it when the gate fails.
    /// Lets downstream units consume the outputs of a region-pinned stack
    /// without trying to deploy it twice.
    #[serde(default)]
    pub read_only_on_mismatch: bool,
}

impl RegionGate {
    pub fn is_unconstrained(&self) -> bool {
        self.require.is_none() && self.exclude.is_none()
    }

    /// Reject gates that pin and exclude at the same time.
    pub fn validate(&self) -> Result<()> {
        if self.require.is_some() && self.exclude.is_some() {
            return Err(Error::Config(
                "A region gate cannot both require and exclude a region.".into(),
            ));
        }
        Ok(())
    }
}

/// Equality check of one accumulated output parameter against a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCheck {
    pub parameter_name: String,
    pub check_value: String,
}

/// Evaluates all gate kinds against one plan's condition table and the
/// effective deployment region.
pub struct ConditionEvaluator {
    conditions: Option<BTreeMap<String, bool>>,
    region: String,
    region_pattern: Regex,
}

impl ConditionEvaluator {
    /// Build an evaluator; the effective region name itself must be
    /// well-formed.
    pub fn new(conditions: Option<BTreeMap<String, bool>>, region: &str) -> Result<Self> {
        let region_pattern = Regex::new(r"^[a-z]+(-[a-z0-9]+)+$").unwrap();
        if !region_pattern.is_match(region) {
            return Err(Error::Config(format!("Invalid region name ({region}).")));
        }
        Ok(Self {
            conditions,
            region: region.to_string(),
            region_pattern,
        })
    }

    /// The region this deployment is running against.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Look up a named condition. `None` means unconditional.
    ///
    /// A named condition without a condition table, or a name absent from
    /// the table, is fatal rather than silently false.
    pub fn should_execute(&self, condition: Option<&str>) -> Result<bool> {
        let Some(name) = condition else {
            return Ok(true);
        };
        let Some(table) = &self.conditions else {
            return Err(Error::Validation(
                "The condition map is missing even though stack condition exists.".into(),
            ));
        };
        match table.get(name) {
            Some(value) => Ok(*value),
            None => Err(Error::Validation(
                "Condition not found in condition map.".into(),
            )),
        }
    }

    /// Compare an accumulated output against a literal, trimmed on both
    /// sides. A check naming an absent parameter is fatal.
    pub fn check_value(
        &self,
        check: Option<&ValueCheck>,
        outputs: &OutputParameterSet,
    ) -> Result<bool> {
        let Some(check) = check else {
            return Ok(true);
        };
        match outputs.get(&check.parameter_name) {
            Some(value) => Ok(value.trim() == check.check_value.trim()),
            None => Err(Error::Validation(
                "Check Condition Parameter doesn't exist!".into(),
            )),
        }
    }

    /// Evaluate a region gate against the effective region.
    pub fn region_gate(&self, gate: &RegionGate) -> Result<bool> {
        gate.validate()?;
        if let Some(required) = &gate.require {
            self.validate_region_name(required)?;
            return Ok(self.region == *required);
        }
        if let Some(excluded) = &gate.exclude {
            self.validate_region_name(excluded)?;
            return Ok(self.region != *excluded);
        }
        Ok(true)
    }

    /// The full gate chain for a mapping: condition, then value check, then
    /// region. Short-circuits in that order, so a false condition hides a
    /// broken value check exactly like the individual calls would.
    pub fn passes(
        &self,
        condition: Option<&str>,
        check: Option<&ValueCheck>,
        gate: &RegionGate,
        outputs: &OutputParameterSet,
    ) -> Result<bool> {
        if !self.should_execute(condition)? {
            return Ok(false);
        }
        if !self.check_value(check, outputs)? {
            return Ok(false);
        }
        self.region_gate(gate)
    }

    fn validate_region_name(&self, name: &str) -> Result<()> {
        if !self.region_pattern.is_match(name) {
            return Err(Error::Validation(format!("Invalid region name ({name}).")));
        }
        Ok(())
    }
}
