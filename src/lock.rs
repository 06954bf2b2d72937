//! Mutex lock recovery so one poisoned lock does not kill the broadcast loop.

use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("mutex poisoned in {context}; recovering");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::lock_or_recover;
    use std::sync::Mutex;

    #[test]
    fn healthy_lock_hands_out_a_working_guard() {
        let samples = Mutex::new(vec![0.25_f32, 0.5]);
        lock_or_recover(&samples, "capture buffer").push(0.75);

        let drained = std::mem::take(&mut *lock_or_recover(&samples, "capture drain"));
        assert_eq!(drained, vec![0.25, 0.5, 0.75]);
        assert!(lock_or_recover(&samples, "capture drain").is_empty());
        assert!(!samples.is_poisoned());
    }

    #[test]
    fn poisoned_lock_recovers_and_keeps_serving_state() {
        let current = Mutex::new(Some("idle.png".to_string()));
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock_or_recover(&current, "poison setup");
            panic!("handler died mid-broadcast");
        });
        assert!(current.is_poisoned(), "panic while held should poison");

        // The hub must keep serving snapshots after a handler panic.
        *lock_or_recover(&current, "broadcast") = Some("talk.png".to_string());
        assert_eq!(
            lock_or_recover(&current, "snapshot").as_deref(),
            Some("talk.png")
        );
    }
}
