//! Output extraction from external command results
//!
//! Commands such as CLI describe calls return JSON documents; the types
//! here run those commands and pull individual values out of the result
//! by parameter path so they can join the accumulated output set.

use thiserror::Error;

pub mod command;
pub mod path;

pub use command::ExternalCommandExtractor;
pub use path::JsonPathExtractor;

/// Failure walking a parameter path over a JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathError {
    /// The path does not match the parameter name grammar.
    #[error("Invalid parameter name syntax.")]
    InvalidSyntax,

    /// The walk ended without producing a value and no default was given.
    #[error("Couldn't find parameter.")]
    NotFound,

    /// A path element descended into a value that is not an object.
    #[error("Element is not a Dictionary")]
    NotADictionary,

    /// A selector was applied to a value that is not an array.
    #[error("Element is not an Array.")]
    NotAnArray,

    /// A trailing selector landed on a value no selector can apply to.
    #[error("Invalid parameter type.")]
    InvalidType,

    /// A filter selector does not have the `name=value` shape.
    #[error("Invalid group filter.")]
    InvalidFilter,

    /// A filter selector matched more than one array element.
    #[error("Too many matches.")]
    TooManyMatches,
}
