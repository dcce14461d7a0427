// 🔀 Merge Engine - fold normalized records into catalog entries
//
// "Same input twice → one revision"
//
//   unknown name      → create tool + revision 1
//   known, unchanged  → no-op (idempotent)
//   known, changed    → overwrite changed fields + new revision
//   forced            → new revision regardless (revert / undo)
//
// Fields missing from the record are left as they are (partial update).
// Audit fields are never taken from the record.

use crate::db::RevisionStore;
use crate::entities::{Revision, Tool};
use crate::error::{CatalogError, Result};
use crate::hooks::{CommitEvent, HookList};
use crate::normalizer::NormalizedRecord;
use crate::schema::{SchemaValidator, ValidationError};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

// ============================================================================
// MERGE OPTIONS & OUTCOME
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Stored on the appended revision
    pub comment: Option<String>,

    /// Append a revision even when no field changed
    pub force: bool,

    /// Compare-and-swap expectation for the tool's current version
    pub expected_version: Option<i64>,
}

impl MergeOptions {
    pub fn forced(comment: impl Into<String>, expected_version: i64) -> Self {
        MergeOptions {
            comment: Some(comment.into()),
            force: true,
            expected_version: Some(expected_version),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub tool: Tool,
    pub created: bool,
    pub changed: bool,
    /// Revision appended by this merge, if any
    pub revision: Option<Revision>,
}

// ============================================================================
// MERGE ENGINE
// ============================================================================

pub struct MergeEngine {
    store: Arc<dyn RevisionStore>,
    validator: SchemaValidator,
    hooks: HookList,
    audit_fields: Vec<String>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn RevisionStore>) -> Self {
        let validator = SchemaValidator::new();
        let audit_fields = validator
            .registry()
            .read_only_fields()
            .into_iter()
            .map(str::to_string)
            .collect();

        MergeEngine {
            store,
            validator,
            hooks: HookList::new(),
            audit_fields,
        }
    }

    pub fn with_hooks(mut self, hooks: HookList) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<dyn RevisionStore> {
        &self.store
    }

    pub fn merge(&self, record: NormalizedRecord, actor: &str) -> Result<MergeOutcome> {
        self.merge_with(record, actor, MergeOptions::default())
    }

    pub fn merge_with(&self, record: NormalizedRecord, actor: &str, options: MergeOptions) -> Result<MergeOutcome> {
        self.validator.validate_record(record.fields()).map_err(reject)?;

        match self.store.get(record.name())? {
            None => self.create(record, actor, options),
            Some(current) => self.update(current, record, actor, options),
        }
    }

    /// Mark a tool deleted. History stays; no revision is appended.
    pub fn soft_delete(&self, name: &str, actor: &str) -> Result<Tool> {
        let tool = self.store.soft_delete(name, actor)?;

        self.hooks.notify(&CommitEvent::Deleted {
            tool: tool.clone(),
            actor: actor.to_string(),
        });

        Ok(tool)
    }

    fn create(&self, record: NormalizedRecord, actor: &str, options: MergeOptions) -> Result<MergeOutcome> {
        // A revert or undo targets an existing head; it only lands here when
        // the tool was deleted between its lookup and this merge
        if options.expected_version.is_some() {
            return Err(CatalogError::not_found(format!("tool '{}'", record.name())));
        }

        let base = Tool::new(record.name(), actor, Utc::now());
        let mut fields = snapshot_fields(&base)?;
        self.overlay(&mut fields, record.fields());

        let tool = Tool::from_snapshot(Value::Object(fields))?;
        self.validator.validate_tool(&tool).map_err(reject)?;

        let (tool, revision) = self.store.create(&tool, actor, options.comment.as_deref())?;
        tracing::info!(tool = %tool.name, actor = %actor, "Created tool");

        self.hooks.notify(&CommitEvent::Created {
            tool: tool.clone(),
            revision: revision.clone(),
            actor: actor.to_string(),
        });

        Ok(MergeOutcome {
            tool,
            created: true,
            changed: false,
            revision: Some(revision),
        })
    }

    fn update(&self, current: Tool, record: NormalizedRecord, actor: &str, options: MergeOptions) -> Result<MergeOutcome> {
        if let Some(expected) = options.expected_version {
            if expected != current.version {
                return Err(CatalogError::ConcurrentModification {
                    name: current.name.clone(),
                    expected,
                    found: current.version,
                });
            }
        }

        if !options.force && current.created_by != actor {
            // Two crawled sources publishing the same name
            tracing::warn!(
                tool = %current.name,
                actor = %actor,
                created_by = %current.created_by,
                "Merging record from a source other than the tool's creator"
            );
        }

        let before = snapshot_fields(&current)?;
        let mut fields = before.clone();
        self.overlay(&mut fields, record.fields());

        // Round-trip through the typed entry so null and [] compare equal
        let mut updated = Tool::from_snapshot(Value::Object(fields))?;
        let after = snapshot_fields(&updated)?;

        let mut changed = false;
        for (field, new_value) in &after {
            if self.is_audit_field(field) {
                continue;
            }
            let old_value = before.get(field).unwrap_or(&Value::Null);
            if old_value != new_value {
                tracing::debug!("{}: Updating {} to {} (was {})", current.name, field, new_value, old_value);
                changed = true;
            }
        }

        if !changed && !options.force {
            return Ok(MergeOutcome {
                tool: current,
                created: false,
                changed: false,
                revision: None,
            });
        }

        updated.version = current.version;
        updated.touch(actor, Utc::now());
        self.validator.validate_tool(&updated).map_err(reject)?;

        let (tool, revision) = self
            .store
            .save(&updated, current.version, actor, options.comment.as_deref())?;
        tracing::info!(tool = %tool.name, version = tool.version, actor = %actor, "Updated tool");

        self.hooks.notify(&CommitEvent::Updated {
            tool: tool.clone(),
            revision: revision.clone(),
            actor: actor.to_string(),
        });

        Ok(MergeOutcome {
            tool,
            created: false,
            changed,
            revision: Some(revision),
        })
    }

    /// Copy incoming content fields over `fields`, skipping audit fields
    fn overlay(&self, fields: &mut Map<String, Value>, incoming: &Map<String, Value>) {
        for (key, value) in incoming {
            if !self.is_audit_field(key) {
                fields.insert(key.clone(), value.clone());
            }
        }
    }

    fn is_audit_field(&self, field: &str) -> bool {
        self.audit_fields.iter().any(|f| f == field)
    }
}

fn snapshot_fields(tool: &Tool) -> Result<Map<String, Value>> {
    match tool.snapshot()? {
        Value::Object(map) => Ok(map),
        _ => Err(CatalogError::validation("record", "Tool did not serialize to an object")),
    }
}

fn reject(errors: Vec<ValidationError>) -> CatalogError {
    for error in &errors {
        tracing::debug!("{}", error);
    }
    CatalogError::from(errors)
}

// ============================================================================
// TESTS
// ============================================================================
