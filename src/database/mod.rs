pub mod schema;

use crate::error::AppError;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Default location of the device database on desktop builds
pub fn default_database_path() -> PathBuf {
    PathBuf::from("./data/fieldtrack.db")
}

/// Opens (and creates if needed) the device database with the full schema
pub fn open_database(db_path: &Path) -> Result<Connection, AppError> {
    // Make sure the directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    // Several connections (queue, credentials) share the file
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    schema::init_schema(&conn)?;

    log::debug!("Opened database at {}", db_path.display());
    Ok(conn)
}

/// In-memory database with the full schema, for tests and dry runs
pub fn open_in_memory() -> Result<Connection, AppError> {
    let conn = Connection::open_in_memory()?;
    schema::init_schema(&conn)?;
    Ok(conn)
}
