//! Process-wide queue instance.
//!
//! An application has one queue. It is installed once at startup with
//! [`init`] and torn down with [`reset`]; everything in between reaches it
//! through [`get`].

use crate::error::{Error, Result};
use crate::queue::QueueService;
use std::sync::{Arc, Mutex, MutexGuard};

static INSTANCE: Mutex<Option<Arc<QueueService>>> = Mutex::new(None);

fn slot() -> MutexGuard<'static, Option<Arc<QueueService>>> {
    // The slot only ever holds an Arc, so a poisoned lock is still consistent
    INSTANCE
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Install the process-wide queue.
///
/// # Errors
///
/// Returns an error if a queue is already installed.
pub fn init(service: QueueService) -> Result<Arc<QueueService>> {
    let mut slot = slot();
    if slot.is_some() {
        return Err(Error::Other(
            "queue runtime already initialised; call runtime::reset() first".into(),
        ));
    }
    let service = Arc::new(service);
    *slot = Some(Arc::clone(&service));
    Ok(service)
}

/// The installed queue.
///
/// # Errors
///
/// Returns an error if [`init`] has not been called.
pub fn get() -> Result<Arc<QueueService>> {
    try_get().ok_or_else(|| Error::Other("queue runtime not initialised".into()))
}

#[must_use]
pub fn try_get() -> Option<Arc<QueueService>> {
    slot().clone()
}

#[must_use]
pub fn is_initialized() -> bool {
    slot().is_some()
}

/// Remove the installed queue, returning it.
///
/// Handles obtained earlier stay valid until dropped.
pub fn reset() -> Option<Arc<QueueService>> {
    slot().take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::queue::ExecutorRegistry;
    use crate::storage::SqliteStorage;

    fn service() -> QueueService {
        QueueService::new(
            SqliteStorage::open_memory().unwrap(),
            ExecutorRegistry::default(),
            QueueSettings::default(),
        )
    }

    // Single test: the instance is process-global.
    #[test]
    fn test_lifecycle() {
        reset();
        assert!(!is_initialized());
        assert!(get().is_err());

        let installed = init(service()).unwrap();
        assert!(is_initialized());
        assert!(Arc::ptr_eq(&installed, &get().unwrap()));

        assert!(init(service()).is_err());

        let removed = reset().unwrap();
        assert!(Arc::ptr_eq(&installed, &removed));
        assert!(try_get().is_none());

        init(service()).unwrap();
        reset();
    }
}
