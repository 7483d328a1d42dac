//! Purpose: Boundary between clients and the messaging middleware that carries requests.
//! Exports: `Middleware`, `TransportBinding`, `BindingId`.
//! Role: Implementations own topic plumbing; clients own bindings.
//! Invariants: A binding is released exactly once, through the middleware that issued it.
//! Invariants: Allocations made while acquiring a binding use the options' allocator.

use crate::core::allocator::Allocator;
use crate::core::error::{Error, ErrorKind};
use crate::core::names::{apply_remaps, expand_name};
use crate::core::node::Node;
use crate::core::options::ClientOptions;
use crate::core::type_support::ServiceTypeSupport;
use std::any::Any;
use std::fmt;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-client transport resource.
pub struct TransportBinding {
    id: BindingId,
    implementation: &'static str,
    data: Box<dyn Any + Send + Sync>,
}

impl TransportBinding {
    pub fn new(id: BindingId, implementation: &'static str, data: impl Any + Send + Sync) -> Self {
        Self {
            id,
            implementation,
            data: Box::new(data),
        }
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    pub fn implementation(&self) -> &'static str {
        self.implementation
    }

    pub fn data<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl fmt::Debug for TransportBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBinding")
            .field("id", &self.id)
            .field("implementation", &self.implementation)
            .finish()
    }
}

pub trait Middleware: Send + Sync {
    fn identifier(&self) -> &'static str;

    /// False once the middleware context has been shut down.
    fn context_is_valid(&self) -> bool;

    /// Expands `raw` against the node's namespace, then applies its remap rules.
    fn resolve_name(&self, node: &Node, raw: &str) -> Result<String, Error> {
        let (Some(name), Some(namespace)) = (node.name(), node.namespace()) else {
            return Err(Error::new(ErrorKind::NodeInvalid).with_message("node is not initialized"));
        };
        let expanded = expand_name(raw, name, namespace)?;
        let rules = node.options().map(|options| options.remaps.as_slice()).unwrap_or(&[]);
        apply_remaps(&expanded, rules, name, namespace)
    }

    fn acquire_binding(
        &self,
        node: &Node,
        type_support: &ServiceTypeSupport,
        resolved_name: &str,
        options: &ClientOptions,
    ) -> Result<TransportBinding, Error>;

    fn release_binding(&self, binding: TransportBinding, allocator: &Allocator)
    -> Result<(), Error>;

    fn binding_is_valid(&self, binding: &TransportBinding) -> bool;

    fn send(
        &self,
        binding: &TransportBinding,
        serialized: &[u8],
        sequence_number: u64,
    ) -> Result<(), Error>;
}
