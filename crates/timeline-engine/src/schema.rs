//! Attribute schema discovery.
//!
//! Scans raw attribute lists, extracts every distinct trimmed token and
//! produces a sorted registry of attribute names. The registry is frozen for
//! the duration of a run and evolves additively across runs: removal is
//! never inferred.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};
use crate::types::{EntityId, RawSnapshot, StaticSnapshot};

/// Canonically ordered set of attribute names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeSchema(BTreeSet<String>);

impl AttributeSchema {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    /// Attribute names in registry order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names present in `self` but not in `existing`, in registry order.
    pub fn added_since(&self, existing: &AttributeSchema) -> Vec<String> {
        self.0.difference(&existing.0).cloned().collect()
    }

    /// Union of both schemas. Used to grow a persisted schema.
    pub fn extended_with(&self, names: &[String]) -> AttributeSchema {
        let mut merged = self.0.clone();
        merged.extend(names.iter().cloned());
        AttributeSchema(merged)
    }
}

/// Result of comparing a freshly discovered schema with the persisted one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChangeReport {
    pub changed: bool,
    pub new_attributes: Vec<String>,
}

/// Compare `discovered` against `existing`: `new_attributes = discovered − existing`.
pub fn diff(discovered: &AttributeSchema, existing: &AttributeSchema) -> SchemaChangeReport {
    let new_attributes = discovered.added_since(existing);
    SchemaChangeReport {
        changed: !new_attributes.is_empty(),
        new_attributes,
    }
}

/// Split a serialized attribute list into trimmed tokens.
///
/// Accepts a JSON array of strings (`["Wifi", "Kitchen"]`), a brace list
/// (`{Wifi,"Air conditioning"}`) or a bare comma-separated string. Empty
/// tokens are dropped.
///
/// # Errors
/// Returns `TimelineError::SchemaDiscovery` on unbalanced delimiters or an
/// unparseable JSON array.
pub fn parse_attribute_list(entity_id: EntityId, raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let malformed = |message: String| TimelineError::SchemaDiscovery { entity_id, message };

    let body = match (trimmed.chars().next(), trimmed.chars().last()) {
        (Some('['), Some(']')) => {
            let items: Vec<String> = serde_json::from_str(trimmed)
                .map_err(|e| malformed(format!("invalid attribute array: {}", e)))?;
            return Ok(items.iter().filter_map(|s| clean_token(s)).collect());
        }
        (Some('{'), Some('}')) => &trimmed[1..trimmed.len() - 1],
        (Some('[' | '{'), _) | (_, Some(']' | '}')) => {
            return Err(malformed(format!("unbalanced attribute list: {}", trimmed)));
        }
        _ => trimmed,
    };

    Ok(split_unquoted_commas(body)
        .into_iter()
        .filter_map(clean_token)
        .collect())
}

/// Split on commas outside double quotes, so `"Washer, dryer"` stays whole.
fn split_unquoted_commas(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn clean_token(token: &str) -> Option<String> {
    let t = token.trim().trim_matches('"').trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Discover the attribute schema from change snapshots and, optionally, the
/// static listing snapshots.
///
/// # Errors
/// Any malformed attribute list aborts discovery.
pub fn discover(snapshots: &[RawSnapshot], statics: &[StaticSnapshot]) -> Result<AttributeSchema> {
    let mut names = BTreeSet::new();
    let lists = snapshots
        .iter()
        .map(|s| (s.entity_id, s.attributes.as_str()))
        .chain(statics.iter().map(|s| (s.entity_id, s.attributes.as_str())));

    for (entity_id, raw) in lists {
        names.extend(parse_attribute_list(entity_id, raw)?);
    }

    tracing::debug!(attributes = names.len(), "schema discovered");
    Ok(AttributeSchema(names))
}
