//! Purpose: In-process loopback middleware for clients, tests, and the CLI.
//! Exports: `MemoryMiddleware`, `RequestRecord`, `MEMORY_IDENTIFIER`.
//! Role: Records sent requests per service; does not deliver replies.
//! Invariants: Topic names of a binding are allocated with the client's allocator.
//! Invariants: `shutdown` invalidates the context and every outstanding binding.
//! Invariants: Keep-last bindings retain at most `depth` requests per service (at least one).
//! Invariants: A service's queue is dropped when its last binding is released.

use crate::core::allocator::{AllocatedStr, Allocator};
use crate::core::error::{Error, ErrorKind};
use crate::core::middleware::{BindingId, Middleware, TransportBinding};
use crate::core::node::Node;
use crate::core::options::{ClientOptions, History, QosProfile};
use crate::core::type_support::ServiceTypeSupport;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

pub const MEMORY_IDENTIFIER: &str = "svclient_memory";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RequestRecord {
    pub binding: BindingId,
    pub service: String,
    pub type_name: String,
    pub sequence_number: u64,
    pub payload: Vec<u8>,
}

struct BindingEntry {
    service: String,
    type_name: String,
    qos: QosProfile,
}

struct MemoryTopics {
    request: AllocatedStr,
    reply: AllocatedStr,
}

#[derive(Default)]
struct MemoryState {
    bindings: HashMap<BindingId, BindingEntry>,
    queues: HashMap<String, VecDeque<RequestRecord>>,
}

#[derive(Default)]
pub struct MemoryMiddleware {
    state: Mutex<MemoryState>,
    next_binding: AtomicU64,
    shut_down: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance, used by the C ABI.
    pub fn shared() -> Arc<MemoryMiddleware> {
        static SHARED: OnceLock<Arc<MemoryMiddleware>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(MemoryMiddleware::new())).clone()
    }

    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        tracing::debug!(middleware = MEMORY_IDENTIFIER, "context shut down");
    }

    /// Makes every following `send` fail with `ErrorKind::Transport`.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn binding_count(&self) -> usize {
        self.lock().map(|state| state.bindings.len()).unwrap_or(0)
    }

    pub fn binding_qos(&self, binding: BindingId) -> Option<QosProfile> {
        let state = self.lock().ok()?;
        state.bindings.get(&binding).map(|entry| entry.qos)
    }

    pub fn take_requests(&self, service: &str) -> Result<Vec<RequestRecord>, Error> {
        let mut state = self.lock()?;
        Ok(state
            .queues
            .remove(service)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default())
    }

    /// Request and reply topic names of a binding issued by this middleware.
    pub fn topics(binding: &TransportBinding) -> Option<(&str, &str)> {
        binding
            .data::<MemoryTopics>()
            .map(|topics| (topics.request.as_str(), topics.reply.as_str()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("memory middleware lock poisoned"))
    }

    fn check_owner(&self, binding: &TransportBinding) -> Result<(), Error> {
        if binding.implementation() != MEMORY_IDENTIFIER {
            return Err(Error::new(ErrorKind::InvalidArgument).with_message(format!(
                "binding belongs to {}, not {MEMORY_IDENTIFIER}",
                binding.implementation()
            )));
        }
        Ok(())
    }
}

fn topic_name(
    allocator: &Allocator,
    prefix: &str,
    service: &str,
    suffix: &str,
) -> Result<AllocatedStr, Error> {
    let mut topic = allocator.alloc_str(prefix)?;
    topic.push_str(service)?;
    topic.push_str(suffix)?;
    Ok(topic)
}

impl Middleware for MemoryMiddleware {
    fn identifier(&self) -> &'static str {
        MEMORY_IDENTIFIER
    }

    fn context_is_valid(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst)
    }

    fn acquire_binding(
        &self,
        _node: &Node,
        type_support: &ServiceTypeSupport,
        resolved_name: &str,
        options: &ClientOptions,
    ) -> Result<TransportBinding, Error> {
        if !self.context_is_valid() {
            return Err(Error::new(ErrorKind::Transport)
                .with_message("context is shut down")
                .with_service(resolved_name));
        }
        let request = topic_name(&options.allocator, "rq", resolved_name, "Request")?;
        let reply = topic_name(&options.allocator, "rr", resolved_name, "Reply")?;

        let id = BindingId(self.next_binding.fetch_add(1, Ordering::Relaxed) + 1);
        let mut state = self.lock()?;
        state.bindings.insert(
            id,
            BindingEntry {
                service: resolved_name.to_string(),
                type_name: type_support.type_name(),
                qos: options.qos,
            },
        );
        drop(state);
        tracing::debug!(
            binding = %id,
            service = resolved_name,
            request_topic = request.as_str(),
            "binding acquired"
        );
        Ok(TransportBinding::new(
            id,
            MEMORY_IDENTIFIER,
            MemoryTopics { request, reply },
        ))
    }

    fn release_binding(
        &self,
        binding: TransportBinding,
        _allocator: &Allocator,
    ) -> Result<(), Error> {
        self.check_owner(&binding)?;
        let mut state = self.lock()?;
        let Some(removed) = state.bindings.remove(&binding.id()) else {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message(format!("binding {} is not registered", binding.id())));
        };
        let still_bound = state
            .bindings
            .values()
            .any(|entry| entry.service == removed.service);
        let dropped = if still_bound {
            0
        } else {
            state
                .queues
                .remove(&removed.service)
                .map_or(0, |queue| queue.len())
        };
        drop(state);
        tracing::debug!(
            binding = %binding.id(),
            service = %removed.service,
            dropped_requests = dropped,
            "binding released"
        );
        Ok(())
    }

    fn binding_is_valid(&self, binding: &TransportBinding) -> bool {
        if !self.context_is_valid() || binding.implementation() != MEMORY_IDENTIFIER {
            return false;
        }
        match self.state.lock() {
            Ok(state) => state.bindings.contains_key(&binding.id()),
            Err(_) => false,
        }
    }

    fn send(
        &self,
        binding: &TransportBinding,
        serialized: &[u8],
        sequence_number: u64,
    ) -> Result<(), Error> {
        self.check_owner(binding)?;
        if !self.context_is_valid() {
            return Err(Error::new(ErrorKind::Transport)
                .with_message("context is shut down")
                .with_seq(sequence_number));
        }
        let mut guard = self.lock()?;
        let state = &mut *guard;
        let entry = state.bindings.get(&binding.id()).ok_or_else(|| {
            Error::new(ErrorKind::Transport)
                .with_message(format!("binding {} is not registered", binding.id()))
                .with_seq(sequence_number)
        })?;
        let service = entry.service.clone();
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Transport)
                .with_message("send rejected")
                .with_service(service)
                .with_seq(sequence_number));
        }
        let record = RequestRecord {
            binding: binding.id(),
            service: service.clone(),
            type_name: entry.type_name.clone(),
            sequence_number,
            payload: serialized.to_vec(),
        };
        let queue = state.queues.entry(service).or_default();
        queue.push_back(record);
        if entry.qos.history == History::KeepLast {
            let keep = entry.qos.depth.max(1);
            while queue.len() > keep {
                queue.pop_front();
            }
        }
        Ok(())
    }
}
