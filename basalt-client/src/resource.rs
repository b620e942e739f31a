//! Server-side resource capability traits

use crate::error::Result;
use crate::timeout::Timeout;
use std::sync::Arc;

/// A handle to server-side state that must be explicitly released.
///
/// Transactions, prepared statements, result cursors, and backup sessions all
/// hold state on the server until closed. The structures in this crate
/// (`Owner`, `ResourceRegistry`, the response handles) guarantee that `close`
/// is invoked at most once per resource no matter how the handle is shared,
/// transformed, or timed out.
pub trait ServerResource: Send + Sync {
    /// Dispose the server-side state behind this handle.
    fn close(&self) -> Result<()>;

    /// Set the timeout applied when `close` itself waits on a server reply.
    ///
    /// Only meaningful for resources whose close round-trips to the server;
    /// the default implementation does nothing.
    fn set_close_timeout(&self, _timeout: Timeout) {}
}

impl<T: ServerResource + ?Sized> ServerResource for Arc<T> {
    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn set_close_timeout(&self, timeout: Timeout) {
        (**self).set_close_timeout(timeout)
    }
}

/// Callback by which a resource announces its own disposal.
///
/// A resource constructed with a handler calls `on_closed(self)` from its
/// `close`, letting a `ResourceRegistry` drop its entry when the resource is
/// closed directly rather than through the registry.
pub trait CloseHandler: Send + Sync {
    fn on_closed(&self, resource: &dyn ServerResource);
}

/// Identity of a registered resource.
///
/// Keys are allocation identity, not structural equality: two value-equal
/// resources in distinct allocations represent independent server-side
/// lifetimes and must never be merged. The key is the thin data pointer of
/// the `Arc` payload, stable for as long as the registry holds the `Arc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey(usize);

impl ResourceKey {
    pub fn of(resource: &dyn ServerResource) -> Self {
        ResourceKey(resource as *const dyn ServerResource as *const () as usize)
    }
}
