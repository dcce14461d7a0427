// 🔔 Post-commit hooks - observers of committed catalog changes
//
// Hooks run synchronously, in registration order, after the store has
// committed. A failing hook is logged and skipped: the change is already
// durable and is never rolled back because an observer broke.

use crate::db::{Event, SqliteStore};
use crate::entities::{Revision, Tool};
use anyhow::Context;
use crossbeam::channel::{unbounded, Receiver, Sender, TrySendError};
use serde_json::json;
use std::sync::Arc;

// ============================================================================
// COMMIT EVENTS
// ============================================================================

#[derive(Debug, Clone)]
pub enum CommitEvent {
    Created { tool: Tool, revision: Revision, actor: String },
    Updated { tool: Tool, revision: Revision, actor: String },
    Deleted { tool: Tool, actor: String },
}

impl CommitEvent {
    /// Audit event type
    pub fn event_type(&self) -> &'static str {
        match self {
            CommitEvent::Created { .. } => "tool_created",
            CommitEvent::Updated { .. } => "tool_updated",
            CommitEvent::Deleted { .. } => "tool_deleted",
        }
    }

    pub fn tool(&self) -> &Tool {
        match self {
            CommitEvent::Created { tool, .. }
            | CommitEvent::Updated { tool, .. }
            | CommitEvent::Deleted { tool, .. } => tool,
        }
    }

    pub fn revision(&self) -> Option<&Revision> {
        match self {
            CommitEvent::Created { revision, .. } | CommitEvent::Updated { revision, .. } => Some(revision),
            CommitEvent::Deleted { .. } => None,
        }
    }

    pub fn actor(&self) -> &str {
        match self {
            CommitEvent::Created { actor, .. }
            | CommitEvent::Updated { actor, .. }
            | CommitEvent::Deleted { actor, .. } => actor,
        }
    }
}

pub trait CommitHook: Send + Sync {
    fn name(&self) -> &str;

    fn on_commit(&self, event: &CommitEvent) -> anyhow::Result<()>;
}

// ============================================================================
// HOOK LIST
// ============================================================================

#[derive(Clone, Default)]
pub struct HookList {
    hooks: Vec<Arc<dyn CommitHook>>,
}

impl HookList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn push(&mut self, hook: Arc<dyn CommitHook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook once for `event`. Failures are logged, never returned.
    pub fn notify(&self, event: &CommitEvent) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_commit(event) {
                tracing::warn!(
                    hook = hook.name(),
                    tool = %event.tool().name,
                    "Post-commit hook failed: {:#}",
                    e
                );
            }
        }
    }
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Writes one `events` row per committed change.
pub struct AuditTrail {
    store: Arc<SqliteStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        AuditTrail { store }
    }
}

impl CommitHook for AuditTrail {
    fn name(&self) -> &str {
        "audit_trail"
    }

    fn on_commit(&self, event: &CommitEvent) -> anyhow::Result<()> {
        let tool = event.tool();
        let data = match event.revision() {
            Some(revision) => json!({
                "revision_id": revision.id,
                "version": revision.version,
                "content_hash": revision.content_hash,
                "comment": revision.comment,
            }),
            None => json!({
                "version": tool.version,
                "deleted_at": tool.deleted_at.map(|ts| ts.to_rfc3339()),
            }),
        };

        let audit = Event::new(event.event_type(), "tool", &tool.name, data, event.actor());
        self.store
            .record_event(&audit)
            .with_context(|| format!("Failed to record {} for {}", event.event_type(), tool.name))
    }
}

// ============================================================================
// SEARCH INDEX NOTIFICATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexNotification {
    Upsert { name: String },
    Delete { name: String },
}

/// Queues index updates for a search indexer running elsewhere.
pub struct IndexNotifier {
    sender: Sender<IndexNotification>,
}

impl IndexNotifier {
    /// Notifier plus the receiving end the indexer drains
    pub fn channel() -> (Self, Receiver<IndexNotification>) {
        let (sender, receiver) = unbounded();
        (IndexNotifier { sender }, receiver)
    }
}

impl CommitHook for IndexNotifier {
    fn name(&self) -> &str {
        "index_notifier"
    }

    fn on_commit(&self, event: &CommitEvent) -> anyhow::Result<()> {
        let name = event.tool().name.clone();
        let notification = match event {
            CommitEvent::Created { .. } | CommitEvent::Updated { .. } => IndexNotification::Upsert { name },
            CommitEvent::Deleted { .. } => IndexNotification::Delete { name },
        };

        match self.sender.try_send(notification) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => anyhow::bail!("search index queue is full"),
            Err(TrySendError::Disconnected(_)) => anyhow::bail!("search index queue is closed"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
