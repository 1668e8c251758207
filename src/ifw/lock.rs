use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per package name
///
/// Locks are created on first use and kept for the lifetime of the map, so the
/// map grows with the number of distinct packages touched.
#[derive(Default)]
pub struct PackageLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PackageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `package_name`
    pub async fn acquire(&self, package_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(locks.entry(package_name.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
