//! Single-slot resource ownership with exactly-once extraction

use crate::error::Result;
use crate::resource::ServerResource;
use crate::timeout::Timeout;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;

/// Holds at most one live `ServerResource`, guaranteeing exactly-once
/// extraction no matter how many threads race on it.
///
/// `release` is a single atomic swap of the slot: two threads racing on
/// `close` and `release` can never both observe the value, so the resource's
/// `close` runs at most once. `Owner` underpins both `response::wrap` and the
/// intermediate-value handling in `MappedResponse`.
///
/// ```
/// use basalt_client::{Owner, Result, ServerResource};
///
/// struct BackupSession;
/// impl ServerResource for BackupSession {
///     fn close(&self) -> Result<()> { Ok(()) }
/// }
///
/// let owner = Owner::of(BackupSession);
/// let session = owner.release();
/// assert!(session.is_some());
/// assert!(owner.release().is_none());
/// ```
pub struct Owner<T: ServerResource> {
    slot: Mutex<Option<T>>,
}

impl<T: ServerResource> Owner<T> {
    /// Create an owner holding `value`.
    pub fn of(value: T) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
        }
    }

    /// Peek at the held value without transferring ownership.
    pub fn get(&self) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.slot.lock(), |slot| slot.as_mut()).ok()
    }

    /// Atomically swap the slot to empty and return what it held.
    ///
    /// Exactly-once: a second call returns `None`, and the owner will never
    /// close a released value.
    pub fn release(&self) -> Option<T> {
        self.slot.lock().take()
    }

    /// Hand the held value to a fresh owner, emptying this one.
    ///
    /// The idiomatic way to move a resource to a new holder without ever
    /// double-holding it.
    pub fn transfer(&self) -> Owner<T> {
        Owner {
            slot: Mutex::new(self.release()),
        }
    }
}

impl<T: ServerResource> ServerResource for Owner<T> {
    /// Close the held value if any. Idempotent: `release` guarantees at most
    /// one non-empty extraction across all paths.
    fn close(&self) -> Result<()> {
        match self.release() {
            Some(resource) => resource.close(),
            None => Ok(()),
        }
    }

    /// Forward to the held value; no-op when empty.
    fn set_close_timeout(&self, timeout: Timeout) {
        if let Some(resource) = self.get() {
            resource.set_close_timeout(timeout);
        }
    }
}

impl<T: ServerResource> Drop for Owner<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.release() {
            if let Err(e) = resource.close() {
                warn!("Failed to close owned resource on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Probe {
        closes: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    closes: closes.clone(),
                },
                closes,
            )
        }
    }

    impl ServerResource for Probe {
        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_release_exactly_once() {
        let (probe, closes) = Probe::new();
        let owner = Owner::of(probe);

        assert!(owner.release().is_some());
        assert!(owner.release().is_none());
        assert!(owner.release().is_none());

        // The owner never closed the extracted value
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_disposes_once() {
        let (probe, closes) = Probe::new();
        let owner = Owner::of(probe);

        owner.close().unwrap();
        owner.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_after_release_is_noop() {
        let (probe, closes) = Probe::new();
        let owner = Owner::of(probe);

        let released = owner.release().unwrap();
        owner.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        released.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transfer_moves_value() {
        let (probe, closes) = Probe::new();
        let owner = Owner::of(probe);

        let next = owner.transfer();
        assert!(owner.get().is_none());
        assert!(next.get().is_some());

        drop(owner);
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        drop(next);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_leftover() {
        let (probe, closes) = Probe::new();
        drop(Owner::of(probe));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_peek_does_not_extract() {
        let (probe, _closes) = Probe::new();
        let owner = Owner::of(probe);

        assert!(owner.get().is_some());
        assert!(owner.get().is_some());
        assert!(owner.release().is_some());
        assert!(owner.get().is_none());
    }

    #[test]
    fn test_close_propagates_resource_error() {
        struct Broken;
        impl ServerResource for Broken {
            fn close(&self) -> Result<()> {
                Err(ClientError::Io("connection reset".into()))
            }
        }

        let owner = Owner::of(Broken);
        assert!(matches!(owner.close(), Err(ClientError::Io(_))));
        // Second close finds the slot empty
        assert_eq!(owner.close(), Ok(()));
    }

    #[test]
    fn test_concurrent_release_single_winner() {
        let (probe, _closes) = Probe::new();
        let owner = Arc::new(Owner::of(probe));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let owner = owner.clone();
            handles.push(std::thread::spawn(move || owner.release().is_some()));
        }

        let winners: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }

    proptest::proptest! {
        /// Any interleaving of release/transfer/close observes one extraction.
        #[test]
        fn prop_at_most_one_extraction(ops in proptest::collection::vec(0u8..3, 1..32)) {
            let (probe, closes) = Probe::new();
            let mut owner = Owner::of(probe);
            let mut extracted = 0usize;

            for op in ops {
                match op {
                    0 => {
                        if let Some(r) = owner.release() {
                            extracted += 1;
                            drop(r);
                        }
                    }
                    1 => owner = owner.transfer(),
                    _ => owner.close().unwrap(),
                }
            }
            drop(owner);

            // Exactly one of: caller extracted it, or some close/drop disposed it
            proptest::prop_assert_eq!(extracted + closes.load(Ordering::SeqCst), 1);
        }
    }
}
