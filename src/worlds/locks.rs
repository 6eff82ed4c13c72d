use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::database::Scope;

/// One mutex per scope so two backfills never race over the same photos.
///
/// Backfills of different scopes do not block each other.
#[derive(Debug, Default, Clone)]
pub struct ScopeLocks {
    inner: Arc<Mutex<HashMap<Scope, Arc<Mutex<()>>>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, scope: &Scope) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(scope.clone()).or_default().clone()
    }
}

/// Locks a scope handle. The mutex guards no data, so a poisoned lock is
/// still usable.
pub fn acquire(handle: &Mutex<()>) -> MutexGuard<'_, ()> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
