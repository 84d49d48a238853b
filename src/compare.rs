//! Classification comparison for evaluation runs.
//!
//! Compares a generated classification against a stored one attribute by
//! attribute. Attribute values are JSON encoded as strings and sometimes
//! doubly encoded; `safe_json_parse` recovers what it can and treats the
//! rest as opaque strings, so two equally malformed values still compare
//! equal. Comparing across namespaces is an error, never a silent false.

use anyhow::{bail, Result};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::classify::GeneratedClassification;
use crate::models::{Classification, ClassificationAttribute};

/// Borrowed view over anything that carries a namespace and attributes.
#[derive(Clone, Copy)]
pub struct ClassificationView<'a> {
    pub namespace: &'a str,
    pub attributes: &'a [ClassificationAttribute],
}

impl<'a> From<&'a Classification> for ClassificationView<'a> {
    fn from(c: &'a Classification) -> Self {
        Self {
            namespace: &c.namespace,
            attributes: &c.attributes,
        }
    }
}

impl<'a> From<&'a GeneratedClassification> for ClassificationView<'a> {
    fn from(c: &'a GeneratedClassification) -> Self {
        Self {
            namespace: &c.namespace,
            attributes: &c.attributes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub namespace_match: bool,
    pub attributes_match: bool,
    pub overall: bool,
    pub attribute_match_count: usize,
    pub attribute_total_count: usize,
    pub attribute_match_percentage: f64,
}

/// Parse a value that may be JSON, doubly-encoded JSON, or a plain string.
/// Unparseable input is returned as an opaque string value.
pub fn safe_json_parse(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(inner)) => {
            let trimmed = inner.trim_start();
            if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('"') {
                serde_json::from_str(&inner).unwrap_or(Value::String(inner))
            } else {
                Value::String(inner)
            }
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

fn attribute_values(attributes: &[ClassificationAttribute]) -> BTreeMap<&str, Value> {
    attributes
        .iter()
        .map(|a| (a.short_name.as_str(), safe_json_parse(&a.value_json)))
        .collect()
}

/// Attribute-level comparison of two classifications of the same namespace.
/// The percentage is over the union of attribute names, so an attribute
/// present on only one side counts against the score.
pub fn compare_classifications<'a>(
    generated: impl Into<ClassificationView<'a>>,
    original: impl Into<ClassificationView<'a>>,
) -> Result<ComparisonResult> {
    let generated = generated.into();
    let original = original.into();

    if generated.namespace != original.namespace {
        bail!(
            "Cannot compare classifications with different namespaces: {} vs {}",
            generated.namespace,
            original.namespace
        );
    }

    let gen_values = attribute_values(generated.attributes);
    let orig_values = attribute_values(original.attributes);

    let mut all_names: Vec<&str> = gen_values.keys().chain(orig_values.keys()).copied().collect();
    all_names.sort_unstable();
    all_names.dedup();

    let total = all_names.len();
    let matched = all_names
        .iter()
        .filter(|name| {
            matches!(
                (gen_values.get(*name), orig_values.get(*name)),
                (Some(a), Some(b)) if a == b
            )
        })
        .count();

    let attributes_match = matched == total;
    let percentage = if total == 0 {
        100.0
    } else {
        matched as f64 / total as f64 * 100.0
    };

    Ok(ComparisonResult {
        namespace_match: true,
        attributes_match,
        overall: attributes_match,
        attribute_match_count: matched,
        attribute_total_count: total,
        attribute_match_percentage: percentage,
    })
}

/// Human-readable differences between two classifications of the same
/// namespace, one line per differing attribute.
pub fn find_classification_differences<'a>(
    generated: impl Into<ClassificationView<'a>>,
    original: impl Into<ClassificationView<'a>>,
) -> Result<Vec<String>> {
    let generated = generated.into();
    let original = original.into();

    if generated.namespace != original.namespace {
        bail!(
            "Cannot compare classifications with different namespaces: {} vs {}",
            generated.namespace,
            original.namespace
        );
    }

    let gen_values = attribute_values(generated.attributes);
    let orig_values = attribute_values(original.attributes);

    let mut all_names: Vec<&str> = gen_values.keys().chain(orig_values.keys()).copied().collect();
    all_names.sort_unstable();
    all_names.dedup();

    let mut differences = Vec::new();
    for name in all_names {
        match (gen_values.get(name), orig_values.get(name)) {
            (None, Some(orig)) => differences.push(format!(
                "Generated is missing attribute: {} (original has {})",
                name, orig
            )),
            (Some(gen), None) => differences.push(format!(
                "Original is missing attribute: {} (generated has {})",
                name, gen
            )),
            (Some(gen), Some(orig)) if gen != orig => differences.push(format!(
                "Different values for {}:\n  Generated: {}\n  Original: {}",
                name, gen, orig
            )),
            _ => {}
        }
    }

    Ok(differences)
}
