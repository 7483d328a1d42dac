//! Purpose: Service-client handles over a pluggable publish/subscribe transport.
//! Exports: `api` (public surface), `core` (allocator, names, node, middleware), `abi` (C ABI).
//! Role: Library backing the `svclient` binary, Rust callers, and C bindings.
//! Invariants: Client setup is transactional; a failed init leaves nothing behind.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod abi;
pub mod api;
pub mod core;
