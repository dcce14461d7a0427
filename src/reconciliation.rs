// ⚖️ Reconciliation Engine - ingest, diff, revert and undo tool revisions
//
//   ingest:  raw record → Normalizer → MergeEngine → revision
//   diff:    rev A, rev B → Patch (A → B)
//   revert:  rev A → forced merge of A's snapshot onto head
//   undo:    rev A, rev B → apply diff(A, B) to head → forced merge
//
// A revision history only ever grows. Revert and undo append, never rewrite.

use crate::db::RevisionStore;
use crate::entities::{Revision, Tool};
use crate::error::{CatalogError, Result};
use crate::hooks::HookList;
use crate::merge::{MergeEngine, MergeOptions, MergeOutcome};
use crate::normalizer::{NormalizedRecord, Normalizer};
use crate::patch::{Patch, PatchEngine};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Timestamp layout used in revert comments
const REVERT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f%z";

// ============================================================================
// REVISION DIFF
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RevisionDiff {
    pub original: Revision,
    pub operations: Patch,
    pub result: Revision,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    normalizer: Normalizer,
    merger: MergeEngine,
    patches: PatchEngine,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn RevisionStore>) -> Self {
        ReconciliationEngine {
            normalizer: Normalizer::new(),
            merger: MergeEngine::new(store),
            patches: PatchEngine::new(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_patch_engine(mut self, patches: PatchEngine) -> Self {
        self.patches = patches;
        self
    }

    pub fn with_hooks(mut self, hooks: HookList) -> Self {
        self.merger = self.merger.with_hooks(hooks);
        self
    }

    fn store(&self) -> &Arc<dyn RevisionStore> {
        self.merger.store()
    }

    // ========================================================================
    // INGEST
    // ========================================================================

    pub fn normalize_and_merge(&self, raw: Value, actor: &str) -> Result<MergeOutcome> {
        let record = self.normalizer.normalize(raw, actor)?;
        self.merger.merge(record, actor)
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    pub fn get(&self, name: &str) -> Result<Tool> {
        self.store()
            .get(name)?
            .ok_or_else(|| CatalogError::not_found(format!("tool '{}'", name)))
    }

    pub fn list_revisions(&self, name: &str, include_deleted: bool) -> Result<Vec<Revision>> {
        self.store().list_revisions(name, include_deleted)
    }

    pub fn get_revision(&self, name: &str, id: i64) -> Result<Revision> {
        self.get(name)?;
        self.store().get_revision(name, id)
    }

    pub fn diff(&self, name: &str, left_id: i64, right_id: i64) -> Result<RevisionDiff> {
        let original = self.get_revision(name, left_id)?;
        let result = self.get_revision(name, right_id)?;
        let operations = self.patches.diff(&original.snapshot, &result.snapshot);

        Ok(RevisionDiff {
            original,
            operations,
            result,
        })
    }

    // ========================================================================
    // REVERT / UNDO
    // ========================================================================

    /// Make revision `id` the content of a new head revision.
    pub fn revert(&self, name: &str, id: i64, actor: &str) -> Result<MergeOutcome> {
        let current = self.get(name)?;
        let target = self.store().get_revision(name, id)?;

        let comment = format!(
            "Revert to revision {} dated {} by {}",
            target.id,
            target.created_at.format(REVERT_TIMESTAMP_FORMAT),
            target.author
        );
        tracing::info!(tool = %name, actor = %actor, "{}", comment);

        let record = NormalizedRecord::from_snapshot(target.snapshot)?;
        self.merger
            .merge_with(record, actor, MergeOptions::forced(comment, current.version))
    }

    /// Apply `diff(left_id, right_id)` to the current head. Passing the newer
    /// revision as `left_id` reverses the changes made between the two.
    pub fn undo(&self, name: &str, left_id: i64, right_id: i64, actor: &str) -> Result<MergeOutcome> {
        let RevisionDiff { operations, .. } = self.diff(name, left_id, right_id)?;

        let head = self.store().head_revision(name)?;
        let patched = self.patches.apply(&head.snapshot, &operations)?;

        let comment = format!("Undo revisions from {} to {}", left_id, right_id);
        tracing::info!(tool = %name, actor = %actor, operations = operations.len(), "{}", comment);

        let record = NormalizedRecord::from_snapshot(patched)?;
        match self
            .merger
            .merge_with(record, actor, MergeOptions::forced(comment, head.version))
        {
            Err(CatalogError::ConcurrentModification { expected, found, .. }) => Err(CatalogError::PatchConflict {
                index: 0,
                op: "test".to_string(),
                path: String::new(),
                reason: format!("head moved from version {} to {} while undoing", expected, found),
            }),
            other => other,
        }
    }

    pub fn soft_delete(&self, name: &str, actor: &str) -> Result<Tool> {
        self.merger.soft_delete(name, actor)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::patch::PatchOperation;
    use serde_json::json;

    fn setup() -> ReconciliationEngine {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        ReconciliationEngine::new(store)
    }

    fn foo(title: &str, keywords: Value) -> Value {
        json!({
            "name": "toolforge.foo",
            "title": title,
            "description": "Does foo things",
            "url": "https://foo.toolforge.org",
            "keywords": keywords,
        })
    }

    /// rev1 title "Foo", rev2 title "Foo2"
    fn two_revisions(engine: &ReconciliationEngine) -> (Revision, Revision) {
        engine.normalize_and_merge(foo("Foo", json!([])), "crawler").unwrap();
        engine.normalize_and_merge(foo("Foo2", json!([])), "crawler").unwrap();

        let revisions = engine.list_revisions("toolforge-foo", false).unwrap();
        (revisions[0].clone(), revisions[1].clone())
    }

    #[test]
    fn test_diff_single_replace() {
        let engine = setup();
        let (rev1, rev2) = two_revisions(&engine);

        let diff = engine.diff("toolforge-foo", rev1.id, rev2.id).unwrap();

        assert_eq!(
            diff.operations.operations(),
            &[PatchOperation::Replace {
                path: "/title".to_string(),
                value: json!("Foo2"),
            }]
        );
        assert_eq!(diff.original.id, rev1.id);
        assert_eq!(diff.result.id, rev2.id);
    }

    #[test]
    fn test_revert_appends_revision() {
        let engine = setup();
        let (rev1, _) = two_revisions(&engine);

        let outcome = engine.revert("toolforge-foo", rev1.id, "editor").unwrap();

        assert_eq!(outcome.tool.title, "Foo");
        assert_eq!(outcome.tool.modified_by, "editor");

        let rev3 = outcome.revision.unwrap();
        assert_eq!(rev3.version, 3);
        let comment = rev3.comment.unwrap();
        assert!(comment.starts_with(&format!("Revert to revision {} dated ", rev1.id)));
        assert!(comment.ends_with("+0000 by crawler"));
        assert!(comment.contains(&rev1.created_at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()));

        println!("✅ Revert test PASSED");
    }

    #[test]
    fn test_undo_reverses_changes() {
        let engine = setup();
        let (rev1, rev2) = two_revisions(&engine);

        // rev3 touches a different field
        let mut raw = foo("Foo2", json!([]));
        raw["subtitle"] = json!("Later");
        engine.normalize_and_merge(raw, "crawler").unwrap();

        let outcome = engine.undo("toolforge-foo", rev2.id, rev1.id, "editor").unwrap();

        assert_eq!(outcome.tool.title, "Foo");
        assert_eq!(outcome.tool.subtitle.as_deref(), Some("Later"));
        assert_eq!(
            outcome.revision.unwrap().comment.as_deref(),
            Some(format!("Undo revisions from {} to {}", rev2.id, rev1.id).as_str())
        );
    }

    #[test]
    fn test_undo_keeps_later_list_edit() {
        let engine = setup();
        engine.normalize_and_merge(foo("Foo", json!(["a", "b", "c"])), "crawler").unwrap();
        engine.normalize_and_merge(foo("Foo", json!(["b", "c"])), "crawler").unwrap();
        engine.normalize_and_merge(foo("Foo", json!(["b", "C2"])), "crawler").unwrap();

        let revisions = engine.list_revisions("toolforge-foo", false).unwrap();
        let (rev1, rev2) = (&revisions[0], &revisions[1]);

        let undo = engine.diff("toolforge-foo", rev2.id, rev1.id).unwrap();
        assert_eq!(
            undo.operations.operations(),
            &[PatchOperation::Add {
                path: "/keywords/0".to_string(),
                value: json!("a"),
            }]
        );

        let outcome = engine.undo("toolforge-foo", rev2.id, rev1.id, "editor").unwrap();
        assert_eq!(outcome.tool.keywords, vec!["a", "b", "C2"]);
        assert_eq!(outcome.tool.version, 4);
    }

    #[test]
    fn test_undo_conflict_writes_nothing() {
        let engine = setup();
        engine.normalize_and_merge(foo("Foo", json!(["a"])), "crawler").unwrap();
        engine.normalize_and_merge(foo("Foo", json!(["a", "b"])), "crawler").unwrap();
        engine.normalize_and_merge(foo("Foo", json!([])), "crawler").unwrap();

        let revisions = engine.list_revisions("toolforge-foo", false).unwrap();
        let (rev1, rev2) = (&revisions[0], &revisions[1]);

        // diff(rev2, rev1) removes /keywords/1, which head no longer has
        let err = engine.undo("toolforge-foo", rev2.id, rev1.id, "editor").unwrap_err();
        match err {
            CatalogError::PatchConflict { index, op, path, .. } => {
                assert_eq!(index, 0);
                assert_eq!(op, "remove");
                assert_eq!(path, "/keywords/1");
            }
            other => panic!("expected patch conflict, got {:?}", other),
        }

        assert_eq!(engine.list_revisions("toolforge-foo", false).unwrap().len(), 3);
    }

    #[test]
    fn test_diff_across_tools_is_not_found() {
        let engine = setup();
        let (rev1, rev2) = two_revisions(&engine);

        let mut bar = foo("Bar", json!([]));
        bar["name"] = json!("bar");
        engine.normalize_and_merge(bar, "crawler").unwrap();

        assert!(matches!(engine.diff("bar", rev1.id, rev2.id), Err(CatalogError::NotFound(_))));
        assert!(matches!(engine.diff("missing", rev1.id, rev2.id), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn test_soft_deleted_tool_keeps_history() {
        let engine = setup();
        let (rev1, _) = two_revisions(&engine);

        engine.soft_delete("toolforge-foo", "admin").unwrap();

        assert!(matches!(engine.get("toolforge-foo"), Err(CatalogError::NotFound(_))));
        assert!(matches!(
            engine.revert("toolforge-foo", rev1.id, "editor"),
            Err(CatalogError::NotFound(_))
        ));
        assert_eq!(engine.list_revisions("toolforge-foo", true).unwrap().len(), 2);
    }
}
