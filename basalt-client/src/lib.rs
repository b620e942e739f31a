//! BasaltDB client response and resource lifecycle core
//!
//! Every remote BasaltDB operation returns a [`Response`] handle that a
//! transport completes, and every handle to server-side state (transaction,
//! prepared statement, cursor, backup session) implements [`ServerResource`].
//! This crate supplies the machinery between the two: blocking and timed
//! retrieval, exactly-once ownership transfer, transform memoization, bulk
//! disposal, and deferred closes.

pub mod disposer;
pub mod error;
pub mod mapped;
pub mod owner;
pub mod registry;
pub mod resource;
pub mod response;
pub mod timeout;

// Re-export key types
pub use disposer::{Disposer, DisposerConfig};
pub use error::{ClientError, Result};
pub use mapped::MappedResponse;
pub use owner::Owner;
pub use registry::ResourceRegistry;
pub use resource::{CloseHandler, ResourceKey, ServerResource};
pub use response::{
    failed, pending, pending_with_discard, ready, wrap, FailedResponse, OwnedResponse,
    PendingResponse, ReadyResponse, Response, ResponseSender,
};
pub use timeout::{Timeout, TimeoutPolicy};
