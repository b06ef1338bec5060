use std::panic::Location;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, taking over the guard if a previous holder panicked.
///
/// Session state is a plain status value, so whatever the panicking holder
/// left behind is still a valid state to continue from.
#[track_caller]
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, owner: &'static str) -> MutexGuard<'a, T> {
    let caller = Location::caller();
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::error!(
            target: "qml_debug",
            owner,
            at = %caller,
            "recovered session state after a panic in another holder"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn recovers_poisoned_guard() {
        let mutex = Arc::new(Mutex::new(5));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex, "test"), 5);
        *lock(&mutex, "test") = 6;
        assert_eq!(*lock(&mutex, "test"), 6);
    }
}
