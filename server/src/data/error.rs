//! Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Optimistic-update precondition failed or a uniqueness rule tripped
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// True when the underlying sqlx error is a UNIQUE constraint violation
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => {
            // SQLITE_CONSTRAINT_UNIQUE (2067) / SQLITE_CONSTRAINT_PRIMARYKEY (1555)
            matches!(db.code().as_deref(), Some("2067") | Some("1555"))
        }
        _ => false,
    }
}

/// Map unique violations to Conflict, everything else to Database
pub fn map_insert_err(e: sqlx::Error, what: &str) -> StoreError {
    if is_unique_violation(&e) {
        StoreError::Conflict(format!("{} already exists", what))
    } else {
        StoreError::Database(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = StoreError::conflict("name already exists");
        assert_eq!(err.to_string(), "Conflict: name already exists");
        assert!(err.is_conflict());
    }

    #[test]
    fn test_migration_failed_display() {
        let err = StoreError::MigrationFailed {
            version: 2,
            name: "add_deliveries".to_string(),
            error: "syntax error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Migration 2 (add_deliveries) failed: syntax error"
        );
    }

    #[test]
    fn test_database_error_is_not_conflict() {
        let err = StoreError::Database(sqlx::Error::RowNotFound);
        assert!(!err.is_conflict());
    }
}
