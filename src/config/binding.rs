//! Input-parameter bindings
//!
//! A binding names one template parameter (or command flag) and exactly one
//! way to obtain its value: an upstream output, a parameter store read, or a
//! static value. Plans write bindings as a loose four-field record; the
//! loader converts each into a [`BoundParameter`] up front so that a
//! nonsense combination fails before any remote call is made.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const INVALID_SYNTAX: &str = "Invalid Stack Input Syntax.";

/// Raw binding record as written in a plan file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParameterSpec {
    /// Parameter key this binding feeds. For stack units it must match an
    /// entry in the parameter file; for command parameters it is the flag
    /// text placed in front of the value.
    #[serde(default)]
    pub parameter_name: Option<String>,

    /// Name of an upstream output to copy.
    #[serde(default)]
    pub matching_parameter_name: Option<String>,

    /// Static value, or the fallback when a lookup source misses.
    #[serde(default)]
    pub parameter_value: Option<String>,

    /// Parameter store key to read (always decrypted).
    #[serde(default)]
    pub parameter_store_field_name: Option<String>,
}

impl InputParameterSpec {
    /// Validate the source combination and produce the binding.
    ///
    /// At least one source must be set. A matching source and a store
    /// source together are ambiguous and rejected. A store source with a
    /// static fallback must name its target parameter.
    pub fn bind(&self) -> Result<BoundParameter> {
        let name = self.parameter_name.clone();
        let binding = match (
            self.matching_parameter_name.clone(),
            self.parameter_store_field_name.clone(),
            self.parameter_value.clone(),
        ) {
            (None, None, None) => return Err(Error::Validation(INVALID_SYNTAX.into())),
            (Some(_), Some(_), _) => return Err(Error::Validation(INVALID_SYNTAX.into())),
            (None, Some(_), Some(_)) if name.is_none() => {
                return Err(Error::Validation(INVALID_SYNTAX.into()))
            }
            (Some(matching), None, fallback) => InputBinding::Matching {
                name: matching,
                fallback,
            },
            (None, Some(field), fallback) => InputBinding::Store { field, fallback },
            (None, None, Some(value)) => InputBinding::Static { value },
        };
        Ok(BoundParameter { name, binding })
    }
}

/// A validated value source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputBinding {
    /// Copy an upstream output, with an optional static fallback when the
    /// output is absent.
    Matching {
        name: String,
        fallback: Option<String>,
    },

    /// Read a parameter store key, with an optional static fallback when
    /// the key is absent.
    Store {
        field: String,
        fallback: Option<String>,
    },

    /// A literal value. Each occurrence of `{UUID}` expands to a fresh
    /// UUID at resolution time.
    Static { value: String },
}

/// One parameter with a validated binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParameter {
    /// Target parameter key (stack units) or flag text (command parameters).
    pub name: Option<String>,
    pub binding: InputBinding,
}
