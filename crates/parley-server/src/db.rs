use std::sync::{Arc, Mutex};

use parley_store::Database;

use crate::error::ServiceError;

/// The single SQLite handle shared by every component.
///
/// The mutex is only ever held for the duration of one synchronous statement
/// or transaction, never across an `.await`.
pub type SharedDb = Arc<Mutex<Database>>;

pub fn shared(db: Database) -> SharedDb {
    Arc::new(Mutex::new(db))
}

/// Run `f` with exclusive access to the database.
pub fn with_db<T>(
    db: &SharedDb,
    f: impl FnOnce(&mut Database) -> parley_store::Result<T>,
) -> Result<T, ServiceError> {
    let mut guard = db
        .lock()
        .map_err(|e| ServiceError::Internal(format!("Database lock poisoned: {e}")))?;
    f(&mut guard).map_err(ServiceError::from)
}
