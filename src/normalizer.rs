// 🧹 Record Normalizer - canonicalize toolinfo records before merge
//
// Pure transformation, no I/O:
//   "toolforge.foo"  → "toolforge-foo"      (legacy prefix rewrite + slug)
//   "$schema"        → "_schema"            (schema-reference keys)
//   sponsor: "WMF"   → sponsor: ["WMF"]     (array-or-scalar coercion)
//   "a, b ,, c"      → ["a", "b", "c"]      (keyword splitting)

use crate::attributes::AttributeRegistry;
use crate::error::{CatalogError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// NORMALIZED RECORD
// ============================================================================

/// A record that went through the normalizer. Consumed once by the merge engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    name: String,
    fields: Map<String, Value>,
}

impl NormalizedRecord {
    /// Wrap a stored revision snapshot. Snapshots were normalized when they
    /// were first merged, so only the shape is checked here.
    pub fn from_snapshot(snapshot: Value) -> Result<Self> {
        let Value::Object(fields) = snapshot else {
            return Err(CatalogError::validation("record", "Expected a JSON object"));
        };
        let name = match fields.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(CatalogError::validation("name", "Required field is missing")),
        };
        Ok(NormalizedRecord { name, fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Legacy name prefix and the prefix it is rewritten to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyPrefix {
    pub from: String,
    pub to: String,
}

impl LegacyPrefix {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        LegacyPrefix {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Dotted legacy names would lose their separator when slugged.
pub fn default_legacy_prefixes() -> Vec<LegacyPrefix> {
    vec![LegacyPrefix::new("toolforge.", "toolforge-")]
}

pub struct Normalizer {
    legacy_prefixes: Vec<LegacyPrefix>,
    array_fields: Vec<String>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::with_prefixes(default_legacy_prefixes())
    }

    pub fn with_prefixes(legacy_prefixes: Vec<LegacyPrefix>) -> Self {
        let registry = AttributeRegistry::new();
        let array_fields = registry
            .array_or_scalar_fields()
            .into_iter()
            .map(str::to_string)
            .collect();

        Normalizer {
            legacy_prefixes,
            array_fields,
        }
    }

    pub fn normalize(&self, raw: Value, actor: &str) -> Result<NormalizedRecord> {
        let Value::Object(raw) = raw else {
            return Err(CatalogError::validation("record", "Expected a JSON object"));
        };

        // Schema-reference keys: "$schema" → "_schema", "$language" → "_language"
        let mut record = Map::new();
        for (key, value) in raw {
            match key.strip_prefix('$') {
                Some(rest) => {
                    record.insert(format!("_{}", rest), value);
                }
                None => {
                    // A "$" variant seen earlier wins over the plain "_" key
                    if !record.contains_key(&key) {
                        record.insert(key, value);
                    }
                }
            }
        }

        let name = match record.get("name") {
            Some(Value::String(name)) => self.canonical_name(name)?,
            Some(_) => return Err(CatalogError::validation("name", "Expected a string")),
            None => return Err(CatalogError::validation("name", "Required field is missing")),
        };
        record.insert("name".to_string(), Value::String(name.clone()));

        record.insert("created_by".to_string(), Value::String(actor.to_string()));
        record.insert("modified_by".to_string(), Value::String(actor.to_string()));

        for field in &self.array_fields {
            if let Some(value) = record.get_mut(field) {
                if !value.is_array() && !value.is_null() {
                    *value = Value::Array(vec![value.take()]);
                }
            }
        }

        let keywords = match record.get("keywords") {
            Some(Value::String(keywords)) => Some(split_keywords(keywords)),
            _ => None,
        };
        if let Some(keywords) = keywords {
            let split = keywords.into_iter().map(Value::String).collect();
            record.insert("keywords".to_string(), Value::Array(split));
        }

        Ok(NormalizedRecord {
            name,
            fields: record,
        })
    }

    /// Legacy prefix rewrite followed by slugging
    fn canonical_name(&self, raw: &str) -> Result<String> {
        let mut name = raw.to_string();

        if let Some(prefix) = self
            .legacy_prefixes
            .iter()
            .find(|p| name.starts_with(p.from.as_str()))
        {
            name = format!("{}{}", prefix.to, &name[prefix.from.len()..]);
            tracing::debug!("Rewrote legacy name {} to {}", raw, name);
        }

        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(CatalogError::validation(
                "name",
                format!("'{}' does not produce a valid slug", raw),
            ));
        }
        Ok(slug)
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Unicode-aware slug
///
/// - NFKC-normalize, then lowercase
/// - Drop everything that is not a letter, digit, '_', '-' or whitespace
/// - Collapse runs of whitespace and '-' into a single '-'
/// - Strip leading/trailing '-' and '_'
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut in_separator = false;

    let folded: String = s.nfkc().collect();
    for c in folded.to_lowercase().chars() {
        if c == '-' || c.is_whitespace() {
            if !in_separator {
                slug.push('-');
                in_separator = true;
            }
        } else if c.is_alphanumeric() || c == '_' {
            slug.push(c);
            in_separator = false;
        }
    }

    slug.trim_matches(|c| c == '-' || c == '_').to_string()
}

pub fn is_slug(s: &str) -> bool {
    !s.is_empty() && slugify(s) == s
}

/// "a, b ,, c" → ["a", "b", "c"]
pub fn split_keywords(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
