use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the dedup database locked
    #[error("Another feedmailer instance appears to be using the database. Please stop it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        // SQLITE_CANTOPEN (14): unable to open database file
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// One confirmed notification, as written by the dedup commit.
///
/// `key` is the lookup identity; the remaining columns are kept so an
/// operator can see what a row stands for without reverse-engineering the
/// concatenated key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationRecord {
    pub key: String,
    pub email: String,
    pub link: String,
    pub keyword: String,
}

/// Row shape for inspecting stored notifications.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredNotification {
    pub key: String,
    pub email: Option<String>,
    pub link: Option<String>,
    pub keyword: Option<String>,
    pub sent: bool,
    pub notified_at: String,
}
