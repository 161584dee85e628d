use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a test thread panicked while
/// holding it. Kernel state is only ever mutated by the single running
/// thread, so a poisoned guard carries no torn state.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn div_round_up(n: u32, d: u32) -> u32 {
    n.div_ceil(d)
}
