// 🧰 Tool Entity - a catalog entry and its revisions
//
// "The name is IDENTITY (never changes), every other field is a VALUE"
//
// The field set is fixed, so a Tool is a plain struct. It only becomes a
// path-addressable JSON mapping at the patch boundary, via `snapshot()`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ============================================================================
// TOOL ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlAlternate {
    pub url: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Tool {
    // ========================================================================
    // IDENTITY (immutable, globally unique slug)
    // ========================================================================
    pub name: String,

    // ========================================================================
    // CORE DESCRIPTION
    // ========================================================================
    #[serde(default)]
    pub title: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,

    // ========================================================================
    // OPTIONAL SCALARS
    // ========================================================================
    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub repository: Option<String>,

    #[serde(default)]
    pub subtitle: Option<String>,

    #[serde(default)]
    pub openhub_id: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub url_alternates: Vec<UrlAlternate>,

    #[serde(default)]
    pub bot_username: Option<String>,

    #[serde(default)]
    pub deprecated: bool,

    #[serde(default)]
    pub replaced_by: Option<String>,

    #[serde(default)]
    pub experimental: bool,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub license: Option<String>,

    #[serde(default)]
    pub tool_type: Option<String>,

    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default)]
    pub translate_url: Option<String>,

    #[serde(default)]
    pub bugtracker_url: Option<String>,

    // ========================================================================
    // ARRAY-OR-SCALAR LISTS (always lists once stored)
    // ========================================================================
    #[serde(default, deserialize_with = "null_as_default")]
    pub for_wikis: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub sponsor: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub available_ui_languages: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub technology_used: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub developer_docs_url: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub user_docs_url: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub feedback_url: Vec<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub privacy_policy_url: Vec<String>,

    // ========================================================================
    // SCHEMA REFERENCES
    // ========================================================================
    #[serde(rename = "_schema", default)]
    pub schema: Option<String>,

    #[serde(rename = "_language", default)]
    pub language: Option<String>,

    // ========================================================================
    // AUDIT
    // ========================================================================
    pub created_by: String,
    pub created_date: DateTime<Utc>,
    pub modified_by: String,
    pub modified_date: DateTime<Utc>,

    // ========================================================================
    // STORE BOOKKEEPING (not part of any snapshot)
    // ========================================================================
    /// Soft-delete marker. `None` = active.
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Revision counter, bumped on every committed change. Used for
    /// compare-and-swap; 0 until the tool is first persisted.
    #[serde(skip)]
    pub version: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Tool {
    /// A tool with only its identity and audit fields filled in.
    pub fn new(name: impl Into<String>, actor: &str, now: DateTime<Utc>) -> Self {
        Tool {
            name: name.into(),
            title: String::new(),
            description: String::new(),
            url: String::new(),
            keywords: Vec::new(),
            author: None,
            repository: None,
            subtitle: None,
            openhub_id: None,
            url_alternates: Vec::new(),
            bot_username: None,
            deprecated: false,
            replaced_by: None,
            experimental: false,
            icon: None,
            license: None,
            tool_type: None,
            api_url: None,
            translate_url: None,
            bugtracker_url: None,
            for_wikis: Vec::new(),
            sponsor: Vec::new(),
            available_ui_languages: Vec::new(),
            technology_used: Vec::new(),
            developer_docs_url: Vec::new(),
            user_docs_url: Vec::new(),
            feedback_url: Vec::new(),
            privacy_policy_url: Vec::new(),
            schema: None,
            language: None,
            created_by: actor.to_string(),
            created_date: now,
            modified_by: actor.to_string(),
            modified_date: now,
            deleted_at: None,
            version: 0,
        }
    }

    /// Full field mapping of this tool, as stored in a revision.
    pub fn snapshot(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuild a tool from a revision snapshot. Bookkeeping fields are reset.
    pub fn from_snapshot(snapshot: Value) -> Result<Tool, serde_json::Error> {
        serde_json::from_value(snapshot)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Stamp a modification by `actor`
    pub fn touch(&mut self, actor: &str, now: DateTime<Utc>) {
        self.modified_by = actor.to_string();
        self.modified_date = now;
    }
}

// ============================================================================
// REVISION
// ============================================================================

/// Immutable snapshot of a tool at one point in its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Globally unique revision id
    pub id: i64,

    pub tool_name: String,

    /// Position in this tool's history, starting at 1
    pub version: i64,

    pub snapshot: Value,

    /// SHA-256 over the canonical JSON of `snapshot`
    pub content_hash: String,

    pub author: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Revision {
    /// Hash a snapshot. serde_json maps are key-sorted, so equal snapshots
    /// always hash equally.
    pub fn compute_content_hash(snapshot: &Value) -> String {
        let mut hasher = Sha256::new();
        hasher.update(snapshot.to_string());
        format!("{:x}", hasher.finalize())
    }

    pub fn tool(&self) -> Result<Tool, serde_json::Error> {
        Tool::from_snapshot(self.snapshot.clone())
    }

    pub fn has_same_content(&self, other: &Revision) -> bool {
        self.content_hash == other.content_hash
    }
}

// ============================================================================
// TESTS
// ============================================================================
