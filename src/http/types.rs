use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use super::error::ApiError;

/// Shared state: the single store connection. Requests take the lock for the
/// duration of their database work; nothing else crosses requests.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        AppState {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db
            .lock()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("store lock poisoned")))
    }
}
