//! Purpose: C ABI bridge for bindings (libsvclient).
//! Exports: C-callable node/type-support/client functions and error helpers.
//! Role: Null-checked entry points over `api::Client`; handles are caller-owned structs.
//! Invariants: A zero-initialized handle has a null `impl_`; init fills it only on success.
//! Invariants: A client's `impl_` block comes from the allocator in its options.
//! Invariants: Return codes are 0 on success, otherwise `to_exit_code(kind)`.
//! Notes: Nodes created here run on the process-wide `MemoryMiddleware`.
#![allow(clippy::result_large_err)]
#![allow(clippy::not_unsafe_ptr_arg_deref)]
#![allow(non_camel_case_types)]

use crate::api::{
    AllocateFn, AllocatedBox, Allocator, AllocatorState, BoxSlot, Client, ClientOptions, DeallocateFn, Durability,
    Error, ErrorKind, History, MemoryMiddleware, Node, NodeOptions, QosProfile, ReallocateFn,
    Reliability, ServiceTypeSupport, to_exit_code,
};
use serde_json::Value;
use std::alloc::Layout;
use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr::{self, NonNull};

pub const SVC_RET_OK: i32 = 0;
pub const SVC_RET_INTERNAL: i32 = 1;
pub const SVC_RET_INVALID_ARGUMENT: i32 = 2;
pub const SVC_RET_NODE_INVALID: i32 = 3;
pub const SVC_RET_BAD_ALLOC: i32 = 4;
pub const SVC_RET_TRANSPORT: i32 = 5;

pub type svc_allocate_fn = unsafe extern "C" fn(size: usize, state: *mut c_void) -> *mut c_void;
pub type svc_deallocate_fn = unsafe extern "C" fn(ptr: *mut c_void, state: *mut c_void);
pub type svc_reallocate_fn =
    unsafe extern "C" fn(ptr: *mut c_void, size: usize, state: *mut c_void) -> *mut c_void;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct svc_allocator {
    pub allocate: Option<svc_allocate_fn>,
    pub deallocate: Option<svc_deallocate_fn>,
    pub reallocate: Option<svc_reallocate_fn>,
    pub state: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct svc_qos {
    /// 0 = keep last, 1 = keep all.
    pub history: u32,
    pub depth: u64,
    /// 0 = reliable, 1 = best effort.
    pub reliability: u32,
    /// 0 = volatile, 1 = transient local.
    pub durability: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct svc_client_options {
    pub allocator: svc_allocator,
    pub qos: svc_qos,
}

#[repr(C)]
pub struct svc_node {
    impl_: *mut Node,
}

#[repr(C)]
pub struct svc_client {
    impl_: *mut BoxSlot<Client>,
}

pub struct svc_type_support {
    inner: ServiceTypeSupport,
}

#[repr(C)]
pub struct svc_error {
    kind: i32,
    message: *mut c_char,
}

impl svc_error {
    pub fn kind(&self) -> i32 {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        if self.message.is_null() {
            return None;
        }
        unsafe { CStr::from_ptr(self.message) }.to_str().ok()
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_get_default_allocator() -> svc_allocator {
    svc_allocator {
        allocate: Some(default_c_allocate),
        deallocate: Some(default_c_deallocate),
        reallocate: Some(default_c_reallocate),
        state: ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_client_get_default_options() -> svc_client_options {
    let qos = QosProfile::services_default();
    svc_client_options {
        allocator: svc_get_default_allocator(),
        qos: svc_qos {
            history: 0,
            depth: qos.depth as u64,
            reliability: 0,
            durability: 0,
        },
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_get_zero_initialized_node() -> svc_node {
    svc_node {
        impl_: ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_node_init(
    node: *mut svc_node,
    name: *const c_char,
    namespace: *const c_char,
    out_err: *mut *mut svc_error,
) -> i32 {
    if node.is_null() {
        return fail(out_err, invalid("node is null"));
    }
    let node = unsafe { &mut *node };
    if !node.impl_.is_null() {
        return fail(out_err, invalid("node already initialized"));
    }
    let name = match parse_str(name, "name") {
        Ok(name) => name,
        Err(err) => return fail(out_err, err),
    };
    let namespace = if namespace.is_null() {
        ""
    } else {
        match parse_str(namespace, "namespace") {
            Ok(namespace) => namespace,
            Err(err) => return fail(out_err, err),
        }
    };
    match Node::new(MemoryMiddleware::shared(), name, namespace, NodeOptions::new()) {
        Ok(created) => {
            node.impl_ = Box::into_raw(Box::new(created));
            SVC_RET_OK
        }
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_node_fini(node: *mut svc_node, out_err: *mut *mut svc_error) -> i32 {
    if node.is_null() {
        return fail(out_err, invalid("node is null"));
    }
    let node = unsafe { &mut *node };
    if node.impl_.is_null() {
        return SVC_RET_OK;
    }
    let mut owned = unsafe { Box::from_raw(node.impl_) };
    node.impl_ = ptr::null_mut();
    match owned.fini() {
        Ok(()) => SVC_RET_OK,
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_node_is_valid(node: *const svc_node) -> bool {
    borrow_node(node).is_some_and(Node::is_valid)
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_type_support_new(
    package: *const c_char,
    service: *const c_char,
    out_type_support: *mut *mut svc_type_support,
    out_err: *mut *mut svc_error,
) -> i32 {
    if out_type_support.is_null() {
        return fail(out_err, invalid("out_type_support is null"));
    }
    let package = match parse_str(package, "package") {
        Ok(package) => package,
        Err(err) => return fail(out_err, err),
    };
    let service = match parse_str(service, "service") {
        Ok(service) => service,
        Err(err) => return fail(out_err, err),
    };
    if package.is_empty() || service.is_empty() {
        return fail(out_err, invalid("package and service must not be empty"));
    }
    let handle = Box::new(svc_type_support {
        inner: ServiceTypeSupport::new(package, service),
    });
    unsafe {
        *out_type_support = Box::into_raw(handle);
    }
    SVC_RET_OK
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_type_support_free(type_support: *mut svc_type_support) {
    if type_support.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(type_support));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_get_zero_initialized_client() -> svc_client {
    svc_client {
        impl_: ptr::null_mut(),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_client_init(
    client: *mut svc_client,
    node: *const svc_node,
    type_support: *const svc_type_support,
    service_name: *const c_char,
    options: *const svc_client_options,
    out_err: *mut *mut svc_error,
) -> i32 {
    if client.is_null() {
        return fail(out_err, invalid("client is null"));
    }
    let client = unsafe { &mut *client };
    if !client.impl_.is_null() {
        return fail(out_err, invalid("client already initialized"));
    }
    if node.is_null() {
        return fail(out_err, invalid("node is null"));
    }
    let Some(node) = borrow_node(node) else {
        return fail(
            out_err,
            Error::new(ErrorKind::NodeInvalid).with_message("node is not initialized"),
        );
    };
    if !node.is_valid() {
        return fail(
            out_err,
            Error::new(ErrorKind::NodeInvalid).with_message("node is not valid"),
        );
    }
    if type_support.is_null() {
        return fail(out_err, invalid("type_support is null"));
    }
    let type_support = unsafe { &(*type_support).inner };
    let service_name = match parse_str(service_name, "service_name") {
        Ok(name) => name,
        Err(err) => return fail(out_err, err),
    };
    if options.is_null() {
        return fail(out_err, invalid("options is null"));
    }
    let options = match options_from_c(unsafe { &*options }) {
        Ok(options) => options,
        Err(err) => return fail(out_err, err),
    };

    let mut created = match options.allocator.alloc_box(Client::zeroed()) {
        Ok(created) => created,
        Err(err) => return fail(out_err, err),
    };
    if let Err(err) = created.init(node, type_support, service_name, &options) {
        return fail(out_err, err);
    }
    client.impl_ = created.into_raw().as_ptr();
    SVC_RET_OK
}

/// No-op on a zero-initialized client.
#[unsafe(no_mangle)]
pub extern "C" fn svc_client_fini(
    client: *mut svc_client,
    node: *const svc_node,
    out_err: *mut *mut svc_error,
) -> i32 {
    if client.is_null() {
        return fail(out_err, invalid("client is null"));
    }
    let client = unsafe { &mut *client };
    let Some(slot) = NonNull::new(client.impl_) else {
        return SVC_RET_OK;
    };
    let mut owned = unsafe { AllocatedBox::from_raw(slot) };
    client.impl_ = ptr::null_mut();
    let zero = Node::zeroed();
    let result = owned.fini(borrow_node(node).unwrap_or(&zero));
    match result {
        Ok(()) => SVC_RET_OK,
        Err(err) if node.is_null() && err.kind() == ErrorKind::NodeInvalid => {
            fail(out_err, invalid("node is null"))
        }
        Err(err) => fail(out_err, err),
    }
}

/// Null `node` skips the node check.
#[unsafe(no_mangle)]
pub extern "C" fn svc_client_is_valid(client: *const svc_client, node: *const svc_node) -> bool {
    let Some(client) = borrow_client(client) else {
        return false;
    };
    if node.is_null() {
        return client.is_valid(None);
    }
    match borrow_node(node) {
        Some(node) => client.is_valid(Some(node)),
        None => false,
    }
}

/// Borrowed from the client; null when the client is not valid.
#[unsafe(no_mangle)]
pub extern "C" fn svc_client_get_service_name(client: *const svc_client) -> *const c_char {
    borrow_client(client)
        .and_then(Client::service_name_c_ptr)
        .unwrap_or(ptr::null())
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_send_request(
    client: *mut svc_client,
    json_bytes: *const u8,
    json_len: usize,
    out_sequence_number: *mut u64,
    out_err: *mut *mut svc_error,
) -> i32 {
    if client.is_null() {
        return fail(out_err, invalid("client is null"));
    }
    let client = unsafe { &mut *client };
    if client.impl_.is_null() {
        return fail(out_err, invalid("client is not initialized"));
    }
    if out_sequence_number.is_null() {
        return fail(out_err, invalid("out_sequence_number is null"));
    }
    let request = match parse_json_bytes(json_bytes, json_len) {
        Ok(request) => request,
        Err(err) => return fail(out_err, err),
    };
    let handle = unsafe { (*client.impl_).value_mut() };
    match handle.send_request(&request) {
        Ok(seq) => {
            unsafe {
                *out_sequence_number = seq;
            }
            SVC_RET_OK
        }
        Err(err) => fail(out_err, err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn svc_error_free(err: *mut svc_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        if !err.message.is_null() {
            drop(CString::from_raw(err.message));
        }
    }
}

fn borrow_node<'a>(node: *const svc_node) -> Option<&'a Node> {
    if node.is_null() {
        return None;
    }
    let handle = unsafe { &*node };
    if handle.impl_.is_null() {
        return None;
    }
    unsafe { Some(&*handle.impl_) }
}

fn borrow_client<'a>(client: *const svc_client) -> Option<&'a Client> {
    if client.is_null() {
        return None;
    }
    let handle = unsafe { &*client };
    if handle.impl_.is_null() {
        return None;
    }
    unsafe { Some((*handle.impl_).value()) }
}

fn parse_str<'a>(input: *const c_char, what: &str) -> Result<&'a str, Error> {
    if input.is_null() {
        return Err(invalid(format!("{what} is null")));
    }
    unsafe { CStr::from_ptr(input) }
        .to_str()
        .map_err(|err| invalid(format!("{what} is not valid UTF-8")).with_source(err))
}

fn parse_json_bytes(bytes: *const u8, len: usize) -> Result<Value, Error> {
    if bytes.is_null() {
        return Err(invalid("request is null"));
    }
    let slice = unsafe { std::slice::from_raw_parts(bytes, len) };
    serde_json::from_slice(slice).map_err(|err| invalid("request is not valid json").with_source(err))
}

fn options_from_c(options: &svc_client_options) -> Result<ClientOptions, Error> {
    let qos = &options.qos;
    let history = match qos.history {
        0 => History::KeepLast,
        1 => History::KeepAll,
        _ => return Err(invalid("invalid qos history")),
    };
    let reliability = match qos.reliability {
        0 => Reliability::Reliable,
        1 => Reliability::BestEffort,
        _ => return Err(invalid("invalid qos reliability")),
    };
    let durability = match qos.durability {
        0 => Durability::Volatile,
        1 => Durability::TransientLocal,
        _ => return Err(invalid("invalid qos durability")),
    };
    let depth = usize::try_from(qos.depth).map_err(|err| invalid("qos depth too large").with_source(err))?;
    Ok(ClientOptions::default()
        .with_allocator(allocator_from_c(&options.allocator))
        .with_qos(
            QosProfile::services_default()
                .with_history(history)
                .with_depth(depth)
                .with_reliability(reliability)
                .with_durability(durability),
        ))
}

struct CAllocator {
    allocate: Option<svc_allocate_fn>,
    deallocate: Option<svc_deallocate_fn>,
    reallocate: Option<svc_reallocate_fn>,
    state: *mut c_void,
}

// The caller promises the C allocator is usable from any thread that holds the client.
unsafe impl Send for CAllocator {}
unsafe impl Sync for CAllocator {}

fn allocator_from_c(allocator: &svc_allocator) -> Allocator {
    Allocator {
        allocate: allocator.allocate.map(|_| c_allocate as AllocateFn),
        deallocate: allocator.deallocate.map(|_| c_deallocate as DeallocateFn),
        reallocate: allocator.reallocate.map(|_| c_reallocate as ReallocateFn),
        state: AllocatorState::new(CAllocator {
            allocate: allocator.allocate,
            deallocate: allocator.deallocate,
            reallocate: allocator.reallocate,
            state: allocator.state,
        }),
    }
}

fn c_allocate(layout: Layout, state: &AllocatorState) -> Option<NonNull<u8>> {
    let c = state.downcast_ref::<CAllocator>()?;
    let allocate = c.allocate?;
    NonNull::new(unsafe { allocate(layout.size(), c.state) }.cast::<u8>())
}

unsafe fn c_deallocate(ptr: NonNull<u8>, _layout: Layout, state: &AllocatorState) {
    if let Some(c) = state.downcast_ref::<CAllocator>() {
        if let Some(deallocate) = c.deallocate {
            unsafe { deallocate(ptr.as_ptr().cast(), c.state) }
        }
    }
}

unsafe fn c_reallocate(
    ptr: NonNull<u8>,
    _layout: Layout,
    new_size: usize,
    state: &AllocatorState,
) -> Option<NonNull<u8>> {
    let c = state.downcast_ref::<CAllocator>()?;
    let reallocate = c.reallocate?;
    NonNull::new(unsafe { reallocate(ptr.as_ptr().cast(), new_size, c.state) }.cast::<u8>())
}

// Size-prefixed blocks so the C default allocator can free without a layout.
const HEADER: usize = 16;

unsafe extern "C" fn default_c_allocate(size: usize, _state: *mut c_void) -> *mut c_void {
    let Some(total) = size.checked_add(HEADER) else {
        return ptr::null_mut();
    };
    let Ok(layout) = Layout::from_size_align(total, HEADER) else {
        return ptr::null_mut();
    };
    let base = unsafe { std::alloc::alloc(layout) };
    if base.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        base.cast::<usize>().write(total);
        base.add(HEADER).cast()
    }
}

unsafe extern "C" fn default_c_deallocate(ptr: *mut c_void, _state: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        let base = ptr.cast::<u8>().sub(HEADER);
        let total = base.cast::<usize>().read();
        std::alloc::dealloc(base, Layout::from_size_align_unchecked(total, HEADER));
    }
}

unsafe extern "C" fn default_c_reallocate(
    ptr: *mut c_void,
    size: usize,
    state: *mut c_void,
) -> *mut c_void {
    if ptr.is_null() {
        return unsafe { default_c_allocate(size, state) };
    }
    let fresh = unsafe { default_c_allocate(size, state) };
    if fresh.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        let old_total = ptr.cast::<u8>().sub(HEADER).cast::<usize>().read();
        let keep = (old_total - HEADER).min(size);
        ptr::copy_nonoverlapping(ptr.cast::<u8>(), fresh.cast::<u8>(), keep);
        default_c_deallocate(ptr, state);
    }
    fresh
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidArgument).with_message(message)
}

fn fail(out_err: *mut *mut svc_error, err: Error) -> i32 {
    let code = to_exit_code(err.kind());
    if out_err.is_null() {
        return code;
    }
    let message = CString::new(err.to_string())
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut());
    let error = Box::new(svc_error {
        kind: code,
        message,
    });
    unsafe {
        *out_err = Box::into_raw(error);
    }
    code
}

#[cfg(test)]
mod tests {
    use super::{
        SVC_RET_BAD_ALLOC, SVC_RET_INTERNAL, SVC_RET_INVALID_ARGUMENT, SVC_RET_NODE_INVALID,
        SVC_RET_TRANSPORT, default_c_allocate, default_c_deallocate, default_c_reallocate,
    };
    use crate::api::{ErrorKind, to_exit_code};
    use std::ptr;

    #[test]
    fn return_codes_match_error_kinds() {
        assert_eq!(to_exit_code(ErrorKind::Internal), SVC_RET_INTERNAL);
        assert_eq!(to_exit_code(ErrorKind::InvalidArgument), SVC_RET_INVALID_ARGUMENT);
        assert_eq!(to_exit_code(ErrorKind::NodeInvalid), SVC_RET_NODE_INVALID);
        assert_eq!(to_exit_code(ErrorKind::BadAlloc), SVC_RET_BAD_ALLOC);
        assert_eq!(to_exit_code(ErrorKind::Transport), SVC_RET_TRANSPORT);
    }

    #[test]
    fn default_c_allocator_roundtrips_contents() {
        unsafe {
            let block = default_c_allocate(4, ptr::null_mut()).cast::<u8>();
            assert!(!block.is_null());
            ptr::copy_nonoverlapping(b"abcd".as_ptr(), block, 4);
            let grown = default_c_reallocate(block.cast(), 8, ptr::null_mut()).cast::<u8>();
            assert!(!grown.is_null());
            assert_eq!(std::slice::from_raw_parts(grown, 4), b"abcd");
            default_c_deallocate(grown.cast(), ptr::null_mut());
        }
    }
}
