// ⚠️ Error Model - what the core reports to its callers
// Four domain failures + two infrastructure failures. Nothing is retried here.

use thiserror::Error;

use crate::schema::ValidationError;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Malformed or constraint-violating field value. Raised before any write.
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Unknown tool name or revision id.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A patch operation's precondition does not hold against the target snapshot.
    #[error("Patch conflict at operation {index} ({op} {path}): {reason}")]
    PatchConflict {
        index: usize,
        op: String,
        path: String,
        reason: String,
    },

    /// Lost a compare-and-swap race on the same tool. Retry with fresh state.
    #[error("Concurrent modification of '{name}': expected version {expected}, found {found}")]
    ConcurrentModification {
        name: String,
        expected: i64,
        found: i64,
    },

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        CatalogError::NotFound(what.into())
    }

    /// Status code an HTTP layer should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            CatalogError::Validation { .. } => 400,
            CatalogError::NotFound(_) => 404,
            CatalogError::PatchConflict { .. } | CatalogError::ConcurrentModification { .. } => 409,
            CatalogError::Storage(_) | CatalogError::Serialization(_) => 500,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.http_status() == 409
    }
}

/// The first validator error wins; the rest are already logged by the caller.
impl From<Vec<ValidationError>> for CatalogError {
    fn from(errors: Vec<ValidationError>) -> Self {
        match errors.into_iter().next() {
            Some(first) => CatalogError::Validation {
                field: first.field,
                message: first.message,
            },
            None => CatalogError::validation("record", "validation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(CatalogError::validation("title", "too long").http_status(), 400);
        assert_eq!(CatalogError::not_found("tool 'x'").http_status(), 404);

        let conflict = CatalogError::PatchConflict {
            index: 0,
            op: "replace".to_string(),
            path: "/title".to_string(),
            reason: "path does not exist".to_string(),
        };
        assert_eq!(conflict.http_status(), 409);
        assert!(conflict.is_conflict());

        let race = CatalogError::ConcurrentModification {
            name: "x".to_string(),
            expected: 2,
            found: 3,
        };
        assert!(race.is_conflict());
    }

    #[test]
    fn test_from_validation_errors_keeps_first() {
        let errors = vec![
            ValidationError {
                field: "title".to_string(),
                message: "Required field is empty".to_string(),
                context: "Tool".to_string(),
            },
            ValidationError {
                field: "url".to_string(),
                message: "Required field is empty".to_string(),
                context: "Tool".to_string(),
            },
        ];

        match CatalogError::from(errors) {
            CatalogError::Validation { field, .. } => assert_eq!(field, "title"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_conflict_message_names_operation() {
        let err = CatalogError::PatchConflict {
            index: 2,
            op: "remove".to_string(),
            path: "/keywords/3".to_string(),
            reason: "index out of bounds".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("operation 2"));
        assert!(msg.contains("/keywords/3"));
    }
}
