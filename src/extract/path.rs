//! Parameter path evaluation over JSON documents
//!
//! A parameter path is a slash-separated walk into a JSON document, with
//! optional array selectors: `/Reservations[0]/Instances[Name=api]/PrivateIp`.
//! A selector is either a numeric index or a `field=value` filter that must
//! match exactly one array element. The walk resolves to a string value, or
//! to the mapping's default when the document has nothing at that path.

use regex::Regex;
use serde_json::Value;

use super::PathError;

/// Walks parameter paths over parsed command output.
pub struct JsonPathExtractor {
    path_pattern: Regex,
    segment_pattern: Regex,
    index_pattern: Regex,
    filter_pattern: Regex,
}

impl JsonPathExtractor {
    pub fn new() -> Self {
        Self {
            path_pattern: Regex::new(r"^(/[A-Za-z0-9_-]+(\[[A-Za-z0-9_/= -]+\])?)+$").unwrap(),
            segment_pattern: Regex::new(
                r"^([A-Za-z0-9_-]+)(\[([0-9]+|[A-Za-z0-9_-]+=[A-Za-z0-9_ /-]+)\])?$",
            )
            .unwrap(),
            index_pattern: Regex::new(r"^[0-9]+$").unwrap(),
            filter_pattern: Regex::new(r"^([A-Za-z0-9_-]+)=([A-Za-z0-9_ /-]+)$").unwrap(),
        }
    }

    /// Check a path against the parameter name grammar.
    pub fn validate(&self, path: &str) -> Result<(), PathError> {
        if self.path_pattern.is_match(path) {
            Ok(())
        } else {
            Err(PathError::InvalidSyntax)
        }
    }

    /// Resolve `path` against `document` to a string value.
    ///
    /// Selectors are applied when the walk descends past them; a trailing
    /// selector is applied to the final value and may pick a string
    /// directly out of an array. A walk that ends on nothing returns
    /// `default` when one is given.
    pub fn extract(
        &self,
        document: &Value,
        path: &str,
        default: Option<&str>,
    ) -> Result<String, PathError> {
        self.validate(path)?;

        let mut current = Some(document);
        let mut pending: Option<&str> = None;

        for segment in split_segments(path) {
            let Some(value) = current else { break };

            if pending.is_some() {
                if !value.is_array() {
                    return Err(PathError::NotAnArray);
                }
            } else if !value.is_object() {
                return Err(PathError::NotADictionary);
            }
            if segment.is_empty() {
                continue;
            }

            let captures = self
                .segment_pattern
                .captures(segment)
                .ok_or(PathError::NotFound)?;
            let name = captures.get(1).map_or("", |m| m.as_str());

            let value = if let Some(selector) = pending.take() {
                let Some(selected) = self.select(value, selector, false)? else {
                    current = None;
                    break;
                };
                if !selected.is_object() {
                    return Err(PathError::NotADictionary);
                }
                selected
            } else {
                value
            };

            current = value.get(name);
            pending = captures.get(3).map(|m| m.as_str());
        }

        let resolved = match (current, pending) {
            (Some(value), Some(selector)) if value.is_array() => {
                self.select(value, selector, true)?
            }
            (other, _) => other,
        };

        match resolved.and_then(Value::as_str) {
            Some(text) => Ok(text.to_string()),
            None => match default {
                Some(value) => Ok(value.to_string()),
                None => Err(PathError::NotFound),
            },
        }
    }

    /// Apply an array selector.
    ///
    /// Mid-walk a selected string is discarded because the walk cannot
    /// descend into it; `extract_string` lets a trailing selector keep it.
    fn select<'a>(
        &self,
        value: &'a Value,
        selector: &str,
        extract_string: bool,
    ) -> Result<Option<&'a Value>, PathError> {
        let Some(items) = value.as_array() else {
            return Err(PathError::InvalidType);
        };

        if self.index_pattern.is_match(selector) {
            let Ok(index) = selector.parse::<usize>() else {
                return Ok(None);
            };
            let Some(element) = items.get(index) else {
                return Ok(None);
            };
            if element.is_string() && !extract_string {
                return Ok(None);
            }
            return Ok(Some(element));
        }

        let captures = self
            .filter_pattern
            .captures(selector)
            .ok_or(PathError::InvalidFilter)?;
        let field = captures.get(1).map_or("", |m| m.as_str());
        let expected = captures.get(2).map_or("", |m| m.as_str());

        let mut matches = items
            .iter()
            .filter(|item| item.get(field).and_then(Value::as_str) == Some(expected));
        let first = matches.next();
        if matches.next().is_some() {
            return Err(PathError::TooManyMatches);
        }
        Ok(first)
    }
}

impl Default for JsonPathExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a path at slashes that sit outside selector brackets.
///
/// A slash inside a selector value, as in `/mounts[Path=/var/log]`, does
/// not separate segments. The leading slash yields an empty first segment.
fn split_segments(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_selector = false;
    for (i, b) in path.bytes().enumerate() {
        match b {
            b'[' => in_selector = true,
            b']' => in_selector = false,
            b'/' if !in_selector => {
                segments.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&path[start..]);
    segments
}
