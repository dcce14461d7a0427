// Tool Catalog - Core Library
// Toolinfo ingestion, revision history, diff / revert / undo

pub mod attributes;     // Field registry
pub mod schema;         // Field validation
pub mod entities;       // Tool + Revision
pub mod normalizer;     // Raw record canonicalization
pub mod patch;          // RFC 6902 diff/apply
pub mod db;             // SQLite revision store
pub mod hooks;          // Post-commit observers
pub mod merge;          // Create / update with change detection
pub mod reconciliation; // Orchestration: ingest, diff, revert, undo
pub mod error;
pub mod config;

// Re-export commonly used types
pub use attributes::{AttributeDefinition, AttributeRegistry, AttributeType, ValidationRule};
pub use config::CatalogConfig;
pub use db::{setup_database, Event, RevisionStore, SqliteStore};
pub use entities::{Revision, Tool, UrlAlternate};
pub use error::{CatalogError, Result};
pub use hooks::{AuditTrail, CommitEvent, CommitHook, HookList, IndexNotification, IndexNotifier};
pub use merge::{MergeEngine, MergeOptions, MergeOutcome};
pub use normalizer::{LegacyPrefix, NormalizedRecord, Normalizer};
pub use patch::{Patch, PatchEngine, PatchOperation};
pub use reconciliation::{ReconciliationEngine, RevisionDiff};
pub use schema::{SchemaValidator, ValidationError, ValidationResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
