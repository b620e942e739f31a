//! Transforming combinator over a response

use crate::error::{ClientError, Result};
use crate::owner::Owner;
use crate::resource::ServerResource;
use crate::response::Response;
use crate::timeout::Timeout;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Composes a response with a transform, turning a low-level reply into a
/// domain object exactly once.
///
/// On the first successful delivery the obtained value is staged in an
/// [`Owner`] and the transform runs against it. A transform that consumes the
/// reply (say, wrapping a raw transaction handle in a `Transaction`) releases
/// it out of the owner; one that only reads it leaves it there, and the
/// leftover is disposed as soon as the transform returns. The transform's
/// result is memoized, so a second caller racing on `get` never re-runs a
/// side-effecting transform and never sees a second live handle.
///
/// `close` delegates to the inner response, which disposes an untransformed
/// reply per its own factory contract.
pub struct MappedResponse<T: ServerResource, V> {
    inner: Box<dyn Response<T>>,
    cell: Mutex<MapCell<T, V>>,
    closed: AtomicBool,
}

struct MapCell<T: ServerResource, V> {
    transform: Option<Box<dyn FnOnce(&Owner<T>) -> Result<V> + Send>>,
    result: Option<Result<V>>,
}

impl<T, V> MappedResponse<T, V>
where
    T: ServerResource + 'static,
    V: Clone + Send + Sync,
{
    pub fn new(
        inner: impl Response<T> + 'static,
        transform: impl FnOnce(&Owner<T>) -> Result<V> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::new(inner),
            cell: Mutex::new(MapCell {
                transform: Some(Box::new(transform)),
                result: None,
            }),
            closed: AtomicBool::new(false),
        }
    }

    fn resolve(&self, timeout: Option<Duration>) -> Result<V> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ResourceClosed("response".into()));
        }

        // A racing caller holds the lock only while transforming; a timed get
        // bounds the lock wait and the delivery wait by one shared deadline.
        let mut cell = match timeout {
            None => self.cell.lock(),
            Some(requested) => {
                let deadline = Instant::now() + requested;
                self.cell
                    .try_lock_until(deadline)
                    .ok_or(ClientError::Timeout(requested))?
            }
        };
        if let Some(result) = &cell.result {
            return result.clone();
        }

        let value = match timeout {
            None => self.inner.get()?,
            Some(requested) => self.inner.get_timeout(requested)?,
        };

        let transform = cell
            .transform
            .take()
            .expect("transform present until first delivery");
        let staging = Owner::of(value);
        let result = transform(&staging);
        if let Err(e) = staging.close() {
            warn!("Failed to dispose untransformed reply: {}", e);
        }
        cell.result = Some(result.clone());
        result
    }
}

impl<T, V> ServerResource for MappedResponse<T, V>
where
    T: ServerResource + 'static,
    V: Clone + Send + Sync,
{
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.inner.close()
    }

    fn set_close_timeout(&self, timeout: Timeout) {
        self.inner.set_close_timeout(timeout);
    }
}

impl<T, V> Response<V> for MappedResponse<T, V>
where
    T: ServerResource + 'static,
    V: Clone + Send + Sync,
{
    fn is_done(&self) -> bool {
        self.inner.is_done()
    }

    fn get(&self) -> Result<V> {
        self.resolve(None)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<V> {
        self.resolve(Some(timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{self, wrap};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    struct RawHandle {
        closes: Arc<AtomicUsize>,
    }

    impl RawHandle {
        fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Arc::new(Self {
                    closes: closes.clone(),
                }),
                closes,
            )
        }
    }

    impl ServerResource for RawHandle {
        fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct Transaction {
        raw: Arc<RawHandle>,
    }

    #[test]
    fn test_transform_runs_exactly_once() {
        let (raw, _closes) = RawHandle::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let mapped = MappedResponse::new(wrap(Owner::of(raw)), move |owner: &Owner<Arc<RawHandle>>| {
            counted.fetch_add(1, Ordering::SeqCst);
            let raw = owner.release().ok_or_else(|| {
                ClientError::ResourceClosed("reply already consumed".into())
            })?;
            Ok(Transaction { raw })
        });

        let first = mapped.get().unwrap();
        let second = mapped.get().unwrap();
        assert!(Arc::ptr_eq(&first.raw, &second.raw));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_consuming_transform_keeps_resource_alive() {
        let (raw, closes) = RawHandle::new();
        let mapped = MappedResponse::new(wrap(Owner::of(raw)), |owner: &Owner<Arc<RawHandle>>| {
            let raw = owner
                .release()
                .ok_or_else(|| ClientError::ResourceClosed("reply already consumed".into()))?;
            Ok(Transaction { raw })
        });

        let tx = mapped.get().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        // The domain object now owns the raw handle
        mapped.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        tx.raw.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reading_transform_disposes_intermediate() {
        let (raw, closes) = RawHandle::new();
        let mapped = MappedResponse::new(wrap(Owner::of(raw)), |owner: &Owner<Arc<RawHandle>>| {
            // Reads the reply without taking it
            assert!(owner.get().is_some());
            Ok("summary".to_string())
        });

        assert_eq!(mapped.get().unwrap(), "summary");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_without_get_disposes_untransformed() {
        let (raw, closes) = RawHandle::new();
        let mapped = MappedResponse::new(
            wrap(Owner::of(raw)),
            |_owner: &Owner<Arc<RawHandle>>| Ok(()),
        );

        mapped.close().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(mapped.get(), Err(ClientError::ResourceClosed(_))));
    }

    #[test]
    fn test_transform_error_memoized() {
        let (raw, closes) = RawHandle::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let mapped = MappedResponse::new(wrap(Owner::of(raw)), move |_: &Owner<Arc<RawHandle>>| {
            counted.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::server(17, "malformed plan"))
        });

        assert_eq!(mapped.get(), Err(ClientError::server(17, "malformed plan")));
        assert_eq!(mapped.get(), Err(ClientError::server(17, "malformed plan")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The staged reply was disposed when the transform failed
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delivery_error_leaves_transform_armed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let (sender, inner) = response::pending::<Arc<RawHandle>>();
        let mapped = MappedResponse::new(inner, move |owner: &Owner<Arc<RawHandle>>| {
            counted.fetch_add(1, Ordering::SeqCst);
            owner.release();
            Ok(1u32)
        });

        // Bounded wait elapses; the transform must not be consumed
        assert!(matches!(
            mapped.get_timeout(Duration::from_millis(10)),
            Err(ClientError::Timeout(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let (raw, _closes) = RawHandle::new();
        sender.complete(raw);
        assert_eq!(mapped.get(), Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_done_delegates() {
        let (sender, inner) = response::pending::<Arc<RawHandle>>();
        let mapped = MappedResponse::new(inner, |_: &Owner<Arc<RawHandle>>| Ok(()));

        assert!(!mapped.is_done());
        let (raw, _closes) = RawHandle::new();
        sender.complete(raw);
        assert!(mapped.is_done());
    }

    #[test]
    fn test_racing_getters_share_one_transform() {
        let (raw, _closes) = RawHandle::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();

        let mapped = Arc::new(MappedResponse::new(
            wrap(Owner::of(raw)),
            move |owner: &Owner<Arc<RawHandle>>| {
                counted.fetch_add(1, Ordering::SeqCst);
                let raw = owner
                    .release()
                    .ok_or_else(|| ClientError::ResourceClosed("reply already consumed".into()))?;
                Ok(Transaction { raw })
            },
        ));

        let barrier = Arc::new(Barrier::new(6));
        let mut handles = Vec::new();
        for _ in 0..6 {
            let mapped = mapped.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                mapped.get().unwrap()
            }));
        }

        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pair in values.windows(2) {
            assert!(Arc::ptr_eq(&pair[0].raw, &pair[1].raw));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
