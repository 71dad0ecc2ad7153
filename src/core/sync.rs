//! Mutex helpers for state that survives a panicking holder

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex whose protected state stays consistent even if a holder panicked
///
/// Only for state that is updated with single assignments (state-machine slots,
/// registries of weak links), where a poisoned lock carries no torn data.
pub fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Recovering state from poisoned mutex");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn poisoned_mutex() -> Arc<Mutex<i32>> {
        let mutex = Arc::new(Mutex::new(42));
        let mutex_clone = Arc::clone(&mutex);

        let _ = thread::spawn(move || {
            let _guard = mutex_clone.lock().unwrap();
            panic!("Intentional panic to poison mutex");
        })
        .join();

        mutex
    }

    #[test]
    fn test_lock_recovering_returns_inner_state() {
        let mutex = poisoned_mutex();
        let guard = lock_recovering(&mutex);
        assert_eq!(*guard, 42);
    }
}
