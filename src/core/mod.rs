// Core modules: allocation policy, naming, node, transport boundary, and errors.
pub mod allocator;
pub mod error;
pub mod memory;
pub mod middleware;
pub mod names;
pub mod node;
pub mod options;
pub mod type_support;
