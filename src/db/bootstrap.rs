//! One-time driver registration.

use crate::db::connection::Driver;
use crate::error::DbResult;
use std::collections::HashSet;
use std::sync::{LazyLock, Mutex, PoisonError};
use tracing::info;

static LOADED_DRIVERS: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Run `driver.load()` unless a driver with the same name was already loaded
/// in this process. Returns true if this call performed the load.
///
/// The registry lock is held during `load`, so concurrent callers wait for the
/// first one instead of loading twice. A failed load is not recorded and will
/// be attempted again.
pub fn ensure_loaded<D: Driver>(driver: &D) -> DbResult<bool> {
    let mut loaded = LOADED_DRIVERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if loaded.contains(driver.name()) {
        return Ok(false);
    }

    driver.load()?;
    loaded.insert(driver.name().to_string());
    info!(driver = driver.name(), "Database driver loaded");
    Ok(true)
}

/// Whether a driver with this name has been loaded.
pub fn is_loaded(name: &str) -> bool {
    LOADED_DRIVERS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(name)
}
