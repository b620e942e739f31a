//! Blocking response handles for in-flight server replies
//!
//! Every remote operation returns a handle implementing [`Response`]. The
//! transport completes the handle through a [`ResponseSender`]; callers block
//! on [`Response::get`] (with or without a deadline) to obtain the value.
//! Factories exist for values that are already present ([`ready`]), already
//! failed ([`failed`]), or owned locally behind an [`Owner`] ([`wrap`]).

use crate::error::{ClientError, Result};
use crate::owner::Owner;
use crate::resource::ServerResource;
use crate::timeout::Timeout;
use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// A value that a transport will eventually deliver.
///
/// `get` and `get_timeout` are the only operations that block. A handle
/// transitions `Pending -> Ready` exactly once, observed consistently by
/// every thread; `close` is idempotent and reachable from any state. Closing
/// a pending handle releases local resources only; it does not abort
/// in-flight server work.
pub trait Response<V>: ServerResource {
    /// Non-blocking completion poll.
    fn is_done(&self) -> bool;

    /// Block the calling thread until the value is delivered.
    fn get(&self) -> Result<V>;

    /// Bounded wait; fails with `ClientError::Timeout` if the deadline
    /// elapses before delivery.
    fn get_timeout(&self, timeout: Duration) -> Result<V>;

    /// Obtain the value, then close the handle on every exit path.
    ///
    /// Equivalent to `get()` followed by `close()`, except that the close is
    /// also guaranteed while unwinding. A close failure after a successful
    /// get surfaces to the caller; after a failed get, the get error wins.
    fn take(&self) -> Result<V> {
        let mut guard = CloseGuard {
            resource: self,
            armed: true,
        };
        let value = self.get();
        guard.armed = false;
        let closed = self.close();
        match value {
            Ok(v) => closed.map(|_| v),
            Err(e) => Err(e),
        }
    }
}

/// Closes a response while unwinding out of a blocking get.
struct CloseGuard<'a, R: ServerResource + ?Sized> {
    resource: &'a R,
    armed: bool,
}

impl<R: ServerResource + ?Sized> Drop for CloseGuard<'_, R> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.resource.close() {
                warn!("Failed to close response during unwind: {}", e);
            }
        }
    }
}

/// Response that is already complete. Holds no server state.
///
/// ```
/// use basalt_client::{response, Response};
///
/// let resp = response::ready(42);
/// assert!(resp.is_done());
/// assert_eq!(resp.get(), Ok(42));
/// ```
pub struct ReadyResponse<V> {
    value: V,
    closed: AtomicBool,
}

/// Response that has already failed. Every `get` returns the error.
pub struct FailedResponse<V> {
    error: ClientError,
    closed: AtomicBool,
    _marker: PhantomData<fn() -> V>,
}

/// Immediately-complete response carrying `value`.
pub fn ready<V: Clone + Send + Sync>(value: V) -> ReadyResponse<V> {
    ReadyResponse {
        value,
        closed: AtomicBool::new(false),
    }
}

/// Immediately-failed response carrying `error`.
pub fn failed<V: Send + Sync>(error: ClientError) -> FailedResponse<V> {
    FailedResponse {
        error,
        closed: AtomicBool::new(false),
        _marker: PhantomData,
    }
}

impl<V: Send + Sync> ServerResource for ReadyResponse<V> {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl<V: Clone + Send + Sync> Response<V> for ReadyResponse<V> {
    fn is_done(&self) -> bool {
        true
    }

    fn get(&self) -> Result<V> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ResourceClosed("response".into()));
        }
        Ok(self.value.clone())
    }

    fn get_timeout(&self, _timeout: Duration) -> Result<V> {
        self.get()
    }
}

impl<V: Send + Sync> ServerResource for FailedResponse<V> {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl<V: Clone + Send + Sync> Response<V> for FailedResponse<V> {
    fn is_done(&self) -> bool {
        true
    }

    fn get(&self) -> Result<V> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ResourceClosed("response".into()));
        }
        Err(self.error.clone())
    }

    fn get_timeout(&self, _timeout: Duration) -> Result<V> {
        self.get()
    }
}

/// Response over a locally-held resource.
///
/// The first successful `get` transfers the value out of the [`Owner`] and
/// memoizes it: concurrent getters observe a single extraction and a single
/// value, never two live handles to the same server state. After a
/// successful `get`, ownership rests with the callers and `close` disposes
/// nothing; before one, `close` disposes whatever the owner still holds.
pub struct OwnedResponse<T: ServerResource> {
    owner: Owner<T>,
    memo: Mutex<Option<T>>,
    closed: AtomicBool,
}

/// Response over a resource already held client-side. See [`OwnedResponse`].
pub fn wrap<T: ServerResource + Clone>(owner: Owner<T>) -> OwnedResponse<T> {
    OwnedResponse {
        owner,
        memo: Mutex::new(None),
        closed: AtomicBool::new(false),
    }
}

impl<T: ServerResource> ServerResource for OwnedResponse<T> {
    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.owner.close()
    }

    fn set_close_timeout(&self, timeout: Timeout) {
        self.owner.set_close_timeout(timeout);
    }
}

impl<T: ServerResource + Clone> Response<T> for OwnedResponse<T> {
    fn is_done(&self) -> bool {
        true
    }

    fn get(&self) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ResourceClosed("response".into()));
        }
        let mut memo = self.memo.lock();
        if let Some(value) = memo.as_ref() {
            return Ok(value.clone());
        }
        let value = self
            .owner
            .release()
            .ok_or_else(|| ClientError::ResourceClosed("resource already released".into()))?;
        *memo = Some(value.clone());
        Ok(value)
    }

    fn get_timeout(&self, _timeout: Duration) -> Result<T> {
        self.get()
    }
}

enum SlotState<V> {
    Pending,
    Ready(Result<V>),
    Closed,
}

struct Shared<V> {
    state: Mutex<SlotState<V>>,
    arrived: Condvar,
    /// What to do with a delivered value the caller never took. Runs when a
    /// reply lands in an already-closed slot, or when the handle is closed
    /// with an untaken value inside.
    discard: Mutex<Option<Box<dyn FnOnce(V) + Send>>>,
    taken: AtomicBool,
}

impl<V> Shared<V> {
    fn deliver(&self, result: Result<V>) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Ready(result);
            drop(state);
            self.arrived.notify_all();
            return;
        }
        // The sender is consumed on delivery, so a completed slot cannot see
        // a second delivery; only the closed case is left.
        let closed = matches!(*state, SlotState::Closed);
        drop(state);
        if closed {
            if let Ok(value) = result {
                warn!("Discarding server reply delivered after close");
                self.discard_value(value);
            }
        }
    }

    fn discard_value(&self, value: V) {
        match self.discard.lock().take() {
            Some(hook) => hook(value),
            None => drop(value),
        }
    }
}

/// Transport-completed response handle. Created by [`pending`].
pub struct PendingResponse<V> {
    shared: Arc<Shared<V>>,
}

/// Completion side of a [`PendingResponse`], held by the transport.
///
/// One-shot: delivering consumes the sender. Dropping it without delivering
/// fails the response with `ClientError::Interrupted`, so a getter is never
/// left blocked on a reply that can no longer arrive.
pub struct ResponseSender<V> {
    shared: Arc<Shared<V>>,
    delivered: bool,
}

/// Creates a response slot for a reply the transport will deliver.
///
/// A value still in the slot at close time is dropped. Replies that carry a
/// server resource must declare their disposal with [`pending_with_discard`]
/// (or arrive through [`wrap`] / `MappedResponse`), so an untaken resource is
/// still released.
pub fn pending<V: Clone + Send + Sync>() -> (ResponseSender<V>, PendingResponse<V>) {
    new_pending(None)
}

/// Like [`pending`], with an explicit hook for a delivered-but-never-taken
/// value.
///
/// ```
/// use basalt_client::response;
///
/// let (sender, resp) = response::pending_with_discard(|stale: u32| {
///     // return the session handle to the server, decrement a gauge, ...
///     let _ = stale;
/// });
/// sender.complete(7);
/// drop(resp); // hook runs: the reply was never taken
/// ```
pub fn pending_with_discard<V: Clone + Send + Sync>(
    hook: impl FnOnce(V) + Send + 'static,
) -> (ResponseSender<V>, PendingResponse<V>) {
    new_pending(Some(Box::new(hook)))
}

fn new_pending<V: Clone + Send + Sync>(
    discard: Option<Box<dyn FnOnce(V) + Send>>,
) -> (ResponseSender<V>, PendingResponse<V>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SlotState::Pending),
        arrived: Condvar::new(),
        discard: Mutex::new(discard),
        taken: AtomicBool::new(false),
    });
    (
        ResponseSender {
            shared: shared.clone(),
            delivered: false,
        },
        PendingResponse { shared },
    )
}

impl<V> ResponseSender<V> {
    /// Deliver the value, completing the response.
    pub fn complete(mut self, value: V) {
        self.delivered = true;
        self.shared.deliver(Ok(value));
    }

    /// Deliver an error, failing the response.
    pub fn fail(mut self, error: ClientError) {
        self.delivered = true;
        self.shared.deliver(Err(error));
    }
}

impl<V> Drop for ResponseSender<V> {
    fn drop(&mut self) {
        if !self.delivered {
            self.shared.deliver(Err(ClientError::Interrupted(
                "response abandoned without delivery".into(),
            )));
        }
    }
}

impl<V: Clone> PendingResponse<V> {
    fn wait(&self, timeout: Option<Duration>) -> Result<V> {
        let deadline = timeout.map(|d| (d, Instant::now() + d));
        let mut state = self.shared.state.lock();

        if matches!(*state, SlotState::Closed) {
            return Err(ClientError::ResourceClosed("response".into()));
        }
        loop {
            if let SlotState::Ready(result) = &*state {
                let result = result.clone();
                if result.is_ok() {
                    self.shared.taken.store(true, Ordering::SeqCst);
                }
                return result;
            }
            // Closed while this thread was blocked in the wait below
            if matches!(*state, SlotState::Closed) {
                return Err(ClientError::Interrupted(
                    "response closed while waiting".into(),
                ));
            }
            match deadline {
                None => self.shared.arrived.wait(&mut state),
                Some((requested, until)) => {
                    if Instant::now() >= until {
                        return Err(ClientError::Timeout(requested));
                    }
                    self.shared.arrived.wait_until(&mut state, until);
                }
            }
        }
    }
}

impl<V: Send + Sync> ServerResource for PendingResponse<V> {
    fn close(&self) -> Result<()> {
        let previous = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut *state, SlotState::Closed)
        };
        self.shared.arrived.notify_all();

        if let SlotState::Ready(Ok(value)) = previous {
            if self.shared.taken.load(Ordering::SeqCst) {
                // Ownership already transferred to the caller that got it
                drop(value);
            } else {
                self.shared.discard_value(value);
            }
        }
        Ok(())
    }
}

impl<V: Clone + Send + Sync> Response<V> for PendingResponse<V> {
    fn is_done(&self) -> bool {
        !matches!(*self.shared.state.lock(), SlotState::Pending)
    }

    fn get(&self) -> Result<V> {
        self.wait(None)
    }

    fn get_timeout(&self, timeout: Duration) -> Result<V> {
        self.wait(Some(timeout))
    }
}

impl<V> Drop for PendingResponse<V> {
    fn drop(&mut self) {
        let previous = {
            let mut state = self.shared.state.lock();
            std::mem::replace(&mut *state, SlotState::Closed)
        };
        if let SlotState::Ready(Ok(value)) = previous {
            if !self.shared.taken.load(Ordering::SeqCst) {
                self.shared.discard_value(value);
            }
        }
    }
}
