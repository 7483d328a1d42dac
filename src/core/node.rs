//! Purpose: Node collaborator that clients are created against.
//! Exports: `Node`, `NodeOptions`, `NodeInstanceId`.
//! Role: Supplies the namespace, remap rules, and middleware for name resolution and bindings.
//! Invariants: A node is either zero-state or fully initialized.
//! Invariants: Clients hold only a `NodeInstanceId`, never the node itself.

use crate::core::error::{Error, ErrorKind};
use crate::core::middleware::Middleware;
use crate::core::names::{RemapRule, normalize_namespace, validate_node_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeInstanceId(u64);

impl NodeInstanceId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeOptions {
    pub remaps: Vec<RemapRule>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_remap(mut self, rule: RemapRule) -> Self {
        self.remaps.push(rule);
        self
    }
}

struct NodeImpl {
    id: NodeInstanceId,
    name: String,
    namespace: String,
    options: NodeOptions,
    middleware: Arc<dyn Middleware>,
}

#[derive(Default)]
pub struct Node {
    inner: Option<NodeImpl>,
}

impl Node {
    pub const fn zeroed() -> Self {
        Self { inner: None }
    }

    pub fn new(
        middleware: Arc<dyn Middleware>,
        name: &str,
        namespace: &str,
        options: NodeOptions,
    ) -> Result<Self, Error> {
        let mut node = Self::zeroed();
        node.init(middleware, name, namespace, options)?;
        Ok(node)
    }

    pub fn init(
        &mut self,
        middleware: Arc<dyn Middleware>,
        name: &str,
        namespace: &str,
        options: NodeOptions,
    ) -> Result<(), Error> {
        if self.inner.is_some() {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("node already initialized"));
        }
        validate_node_name(name)?;
        let namespace = normalize_namespace(namespace)?;
        if !middleware.context_is_valid() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("{} context is not valid", middleware.identifier())));
        }
        let id = NodeInstanceId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(node = name, namespace = %namespace, id = id.0, "node initialized");
        self.inner = Some(NodeImpl {
            id,
            name: name.to_string(),
            namespace,
            options,
            middleware,
        });
        Ok(())
    }

    /// No-op on a zero-state node.
    pub fn fini(&mut self) -> Result<(), Error> {
        if let Some(node) = self.inner.take() {
            tracing::debug!(node = %node.name, id = node.id.0, "node finalized");
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|node| node.middleware.context_is_valid())
    }

    pub fn is_zeroed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|node| node.name.as_str())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.inner.as_ref().map(|node| node.namespace.as_str())
    }

    pub fn fully_qualified_name(&self) -> Option<String> {
        self.inner.as_ref().map(|node| {
            if node.namespace == "/" {
                format!("/{}", node.name)
            } else {
                format!("{}/{}", node.namespace, node.name)
            }
        })
    }

    pub fn options(&self) -> Option<&NodeOptions> {
        self.inner.as_ref().map(|node| &node.options)
    }

    pub fn instance_id(&self) -> Option<NodeInstanceId> {
        self.inner.as_ref().map(|node| node.id)
    }

    pub fn middleware(&self) -> Option<&Arc<dyn Middleware>> {
        self.inner.as_ref().map(|node| &node.middleware)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("Node(zeroed)"),
            Some(node) => f
                .debug_struct("Node")
                .field("id", &node.id)
                .field("name", &node.name)
                .field("namespace", &node.namespace)
                .field("middleware", &node.middleware.identifier())
                .finish(),
        }
    }
}
