//! Purpose: Define the stable public Rust API boundary for svclient.
//! Exports: Client handle plus the collaborator types needed to build one.
//! Role: Public, additive-only surface; the C ABI and CLI build on it.
//! Invariants: Everything a caller needs to init, use, and fini a client is reachable here.

mod client;

pub use crate::core::allocator::{
    AllocateFn, AllocatedBox, AllocatedBytes, AllocatedStr, Allocator, AllocatorState, BoxSlot,
    DeallocateFn, ReallocateFn, default_allocator,
};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::memory::{MEMORY_IDENTIFIER, MemoryMiddleware, RequestRecord};
pub use crate::core::middleware::{BindingId, Middleware, TransportBinding};
pub use crate::core::names::RemapRule;
pub use crate::core::node::{Node, NodeInstanceId, NodeOptions};
pub use crate::core::options::{ClientOptions, Durability, History, QosProfile, Reliability};
pub use crate::core::type_support::ServiceTypeSupport;
pub use client::{ApiResult, Client};
