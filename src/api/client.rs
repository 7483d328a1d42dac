//! Purpose: Service-client handle: transactional init, idempotent fini, validity, and request send.
//! Exports: `Client`, `ApiResult`.
//! Role: The only owner of a `TransportBinding`; mediates every request to the middleware.
//! Invariants: A client is either zero-state or fully initialized, never in between.
//! Invariants: A failed init leaves the client zero-state with every acquisition released.
//! Invariants: The sequence counter advances by one per request the transport accepted.
#![allow(clippy::result_large_err)]

use crate::core::allocator::{AllocatedStr, Allocator};
use crate::core::error::{Error, ErrorKind};
use crate::core::middleware::{Middleware, TransportBinding};
use crate::core::node::{Node, NodeInstanceId};
use crate::core::options::ClientOptions;
use crate::core::type_support::ServiceTypeSupport;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub type ApiResult<T> = Result<T, Error>;

struct ClientImpl {
    service_name: AllocatedStr,
    binding: TransportBinding,
    options: ClientOptions,
    type_support: ServiceTypeSupport,
    middleware: Arc<dyn Middleware>,
    node: NodeInstanceId,
    sequence_number: u64,
}

#[derive(Default)]
pub struct Client {
    inner: Option<ClientImpl>,
}

/// Releases the binding on drop unless committed.
struct BindingGuard<'a> {
    middleware: &'a dyn Middleware,
    allocator: &'a Allocator,
    binding: Option<TransportBinding>,
}

impl BindingGuard<'_> {
    fn binding(&self) -> Option<&TransportBinding> {
        self.binding.as_ref()
    }

    fn commit(mut self) -> ApiResult<TransportBinding> {
        self.binding
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Internal).with_message("binding already taken"))
    }
}

impl Drop for BindingGuard<'_> {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            let id = binding.id();
            if let Err(err) = self.middleware.release_binding(binding, self.allocator) {
                warn!(binding = %id, error = %err, "failed to release binding during unwind");
            }
        }
    }
}

impl Client {
    pub const fn zeroed() -> Self {
        Self { inner: None }
    }

    pub fn default_options() -> ClientOptions {
        ClientOptions::default()
    }

    pub fn is_zeroed(&self) -> bool {
        self.inner.is_none()
    }

    pub fn init(
        &mut self,
        node: &Node,
        type_support: &ServiceTypeSupport,
        service_name: &str,
        options: &ClientOptions,
    ) -> ApiResult<()> {
        if self.inner.is_some() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("client already initialized"));
        }
        let (Some(middleware), Some(node_id)) = (node.middleware(), node.instance_id()) else {
            return Err(Error::new(ErrorKind::NodeInvalid).with_message("node is not initialized"));
        };
        if !node.is_valid() {
            return Err(Error::new(ErrorKind::NodeInvalid).with_message("node is not valid"));
        }
        if service_name.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("service name must not be empty"));
        }
        options.allocator.validate()?;

        let resolved = middleware.resolve_name(node, service_name)?;
        let stored_name = options
            .allocator
            .alloc_str(&resolved)
            .map_err(|err| err.with_service(resolved.as_str()))?;

        let guard = BindingGuard {
            middleware: &**middleware,
            allocator: &options.allocator,
            binding: Some(
                middleware
                    .acquire_binding(node, type_support, &resolved, options)
                    .map_err(|err| err.with_service(resolved.as_str()))?,
            ),
        };
        if !guard
            .binding()
            .is_some_and(|binding| middleware.binding_is_valid(binding))
        {
            return Err(Error::new(ErrorKind::Transport)
                .with_message("middleware returned an unusable binding")
                .with_service(resolved));
        }
        let binding = guard.commit()?;

        debug!(
            service = %resolved,
            binding = %binding.id(),
            middleware = middleware.identifier(),
            "client initialized"
        );
        self.inner = Some(ClientImpl {
            service_name: stored_name,
            binding,
            options: options.clone(),
            type_support: type_support.clone(),
            middleware: Arc::clone(middleware),
            node: node_id,
            sequence_number: 0,
        });
        Ok(())
    }

    /// No-op on a zero-state client; the client is zero-state on return either way.
    pub fn fini(&mut self, node: &Node) -> ApiResult<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };
        let ClientImpl {
            service_name,
            binding,
            options,
            middleware,
            ..
        } = inner;
        let id = binding.id();
        let released = middleware
            .release_binding(binding, &options.allocator)
            .map_err(|err| err.with_service(service_name.as_str()));
        debug!(service = %service_name, binding = %id, "client finalized");
        drop(service_name);
        released?;
        if !node.is_valid() {
            return Err(Error::new(ErrorKind::NodeInvalid)
                .with_message("client finalized against an invalid node"));
        }
        Ok(())
    }

    /// Pure check; `node`, when given, must be the valid node this client was created on.
    pub fn is_valid(&self, node: Option<&Node>) -> bool {
        let Some(inner) = &self.inner else {
            trace!("client is zero-state");
            return false;
        };
        if let Some(node) = node {
            if !node.is_valid() || node.instance_id() != Some(inner.node) {
                trace!("client checked against a foreign or invalid node");
                return false;
            }
        }
        inner.middleware.binding_is_valid(&inner.binding)
    }

    pub fn send_request<T: Serialize + ?Sized>(&mut self, request: &T) -> ApiResult<u64> {
        if !self.is_valid(None) {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("client is not valid"));
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message("client is not valid"));
        };
        let payload = inner
            .type_support
            .serialize_request(request)
            .map_err(|err| err.with_service(inner.service_name.as_str()))?;
        let sequence_number = inner.sequence_number.checked_add(1).ok_or_else(|| {
            Error::new(ErrorKind::Internal)
                .with_message("sequence number exhausted")
                .with_service(inner.service_name.as_str())
        })?;
        inner
            .middleware
            .send(&inner.binding, &payload, sequence_number)
            .map_err(|err| err.with_service(inner.service_name.as_str()))?;
        inner.sequence_number = sequence_number;
        debug!(
            service = %inner.service_name,
            seq = sequence_number,
            bytes = payload.len(),
            "request sent"
        );
        Ok(sequence_number)
    }

    pub fn service_name(&self) -> Option<&str> {
        if !self.is_valid(None) {
            return None;
        }
        self.inner.as_ref().map(|inner| inner.service_name.as_str())
    }

    pub(crate) fn service_name_c_ptr(&self) -> Option<*const std::ffi::c_char> {
        if !self.is_valid(None) {
            return None;
        }
        self.inner.as_ref().map(|inner| inner.service_name.as_c_ptr())
    }

    pub fn options(&self) -> Option<&ClientOptions> {
        self.inner.as_ref().map(|inner| &inner.options)
    }

    pub fn type_support(&self) -> Option<&ServiceTypeSupport> {
        self.inner.as_ref().map(|inner| &inner.type_support)
    }

    /// `Some(0)` before the first accepted request.
    pub fn last_sequence_number(&self) -> Option<u64> {
        self.inner.as_ref().map(|inner| inner.sequence_number)
    }

    #[cfg(test)]
    fn force_sequence_number(&mut self, value: u64) {
        if let Some(inner) = self.inner.as_mut() {
            inner.sequence_number = value;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let id = inner.binding.id();
            if let Err(err) = inner
                .middleware
                .release_binding(inner.binding, &inner.options.allocator)
            {
                warn!(binding = %id, error = %err, "failed to release binding of dropped client");
            }
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            None => f.write_str("Client(zeroed)"),
            Some(inner) => f
                .debug_struct("Client")
                .field("service_name", &inner.service_name.as_str())
                .field("binding", &inner.binding)
                .field("sequence_number", &inner.sequence_number)
                .finish(),
        }
    }
}
