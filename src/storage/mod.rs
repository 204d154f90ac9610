//! Persistent dedup store backed by SQLite.

mod notifications;
mod schema;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, NotificationRecord, StoredNotification};
