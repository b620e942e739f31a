//! Bulk lifecycle management for registered server resources

use crate::error::{ClientError, Result};
use crate::resource::{CloseHandler, ResourceKey, ServerResource};
use crate::timeout::Timeout;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A concurrent set of live server resources with best-effort bulk disposal.
///
/// Domain code registers every transaction, prepared statement, and cursor it
/// hands out; whatever is still registered when the session winds down gets
/// closed in one sweep. Entries are keyed by allocation identity
/// ([`ResourceKey`]), never by value, and each entry is closed at most once
/// whether disposal happens through [`close`](ResourceRegistry::close) or the
/// resource reports its own close via [`CloseHandler::on_closed`].
///
/// ```
/// use basalt_client::{CloseHandler, ResourceRegistry, Result, ServerResource};
/// use std::sync::Arc;
///
/// struct Cursor;
/// impl ServerResource for Cursor {
///     fn close(&self) -> Result<()> { Ok(()) }
/// }
///
/// let registry = ResourceRegistry::new();
/// let cursor = registry.register(Arc::new(Cursor));
/// cursor.close()?;
/// registry.on_closed(&*cursor); // cursor closed itself; drop the entry
/// registry.close()?;            // nothing left to dispose
/// # Ok::<(), basalt_client::ClientError>(())
/// ```
pub struct ResourceRegistry {
    entries: Mutex<HashMap<ResourceKey, Arc<dyn ServerResource>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a resource, returning it unchanged for fluent chaining.
    pub fn register<T: ServerResource + 'static>(&self, resource: Arc<T>) -> Arc<T> {
        let key = ResourceKey::of(&*resource);
        let entry: Arc<dyn ServerResource> = resource.clone();
        self.entries.lock().insert(key, entry);
        resource
    }

    /// Number of currently registered resources.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Apply `timeout` to every registered resource.
    pub fn set_close_timeout(&self, timeout: Timeout) {
        let entries = self.entries.lock();
        for resource in entries.values() {
            resource.set_close_timeout(timeout);
        }
    }

    /// Visit every registered resource without removing it, e.g. to broadcast
    /// a keep-alive ping.
    ///
    /// The entry lock is held for the duration of the iteration; the visitor
    /// must not call back into this registry.
    pub fn for_each(&self, mut visitor: impl FnMut(&dyn ServerResource)) {
        let entries = self.entries.lock();
        for resource in entries.values() {
            visitor(&**resource);
        }
    }

    /// Close every registered resource, draining the registry.
    ///
    /// Entries are popped one at a time so the lock is never held across a
    /// resource close. An `Io` or `Server` failure is logged and the sweep
    /// continues; one bad resource must not prevent disposal of the others.
    /// `Interrupted` propagates immediately: the entry that raised it has
    /// been removed (its close was attempted), the remaining entries stay
    /// registered, and a later `close` call finishes the drain.
    pub fn close(&self) -> Result<()> {
        loop {
            let next = {
                let mut entries = self.entries.lock();
                match entries.keys().next().copied() {
                    Some(key) => entries.remove(&key),
                    None => None,
                }
            };
            let resource = match next {
                Some(resource) => resource,
                None => return Ok(()),
            };
            match resource.close() {
                Ok(()) => {}
                Err(e @ ClientError::Interrupted(_)) => return Err(e),
                Err(e) => warn!("Failed to close registered resource: {}", e),
            }
        }
    }
}

impl CloseHandler for ResourceRegistry {
    /// Drop the entry for a resource that closed itself directly, so a later
    /// bulk close does not dispose it a second time.
    fn on_closed(&self, resource: &dyn ServerResource) {
        if self
            .entries
            .lock()
            .remove(&ResourceKey::of(resource))
            .is_some()
        {
            debug!("Deregistered self-closed resource");
        }
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        if !self.is_empty() {
            if let Err(e) = self.close() {
                warn!("Failed to close registry on drop: {}", e);
            }
        }
    }
}
