// C ABI contract: null handles, zero-initialized nodes, and C allocators.
use std::ffi::{CStr, CString, c_void};
use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

use svclient::abi::{
    SVC_RET_BAD_ALLOC, SVC_RET_INVALID_ARGUMENT, SVC_RET_NODE_INVALID, SVC_RET_OK, svc_client,
    svc_client_fini, svc_client_get_default_options, svc_client_get_service_name,
    svc_client_init, svc_client_is_valid, svc_client_options, svc_error, svc_error_free,
    svc_get_default_allocator, svc_get_zero_initialized_client, svc_get_zero_initialized_node,
    svc_node, svc_node_fini, svc_node_init, svc_node_is_valid, svc_send_request,
    svc_type_support, svc_type_support_free, svc_type_support_new,
};
use svclient::api::MemoryMiddleware;

struct Fixture {
    node: Box<svc_node>,
    type_support: *mut svc_type_support,
}

impl Fixture {
    fn new(node_name: &str) -> Self {
        let mut node = Box::new(svc_get_zero_initialized_node());
        let name = CString::new(node_name).expect("cstring");
        let ret = svc_node_init(&mut *node, name.as_ptr(), ptr::null(), ptr::null_mut());
        assert_eq!(ret, SVC_RET_OK);

        let package = CString::new("example_interfaces").expect("cstring");
        let service = CString::new("AddTwoInts").expect("cstring");
        let mut type_support = ptr::null_mut();
        let ret = svc_type_support_new(
            package.as_ptr(),
            service.as_ptr(),
            &mut type_support,
            ptr::null_mut(),
        );
        assert_eq!(ret, SVC_RET_OK);
        Self { node, type_support }
    }

    fn node(&self) -> *const svc_node {
        &*self.node
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        svc_type_support_free(self.type_support);
        assert_eq!(svc_node_fini(&mut *self.node, ptr::null_mut()), SVC_RET_OK);
    }
}

fn take_error(err: *mut svc_error) -> (i32, String) {
    assert!(!err.is_null(), "expected an error report");
    let report = unsafe { &*err };
    let out = (report.kind(), report.message().unwrap_or_default().to_string());
    svc_error_free(err);
    out
}

#[test]
fn nominal_client() {
    let fixture = Fixture::new("test_client_node");
    let mut client = svc_get_zero_initialized_client();
    let name = CString::new("add_two_ints").expect("cstring");
    let options = svc_client_get_default_options();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &options,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);

    let resolved = svc_client_get_service_name(&client);
    assert!(!resolved.is_null());
    let resolved = unsafe { CStr::from_ptr(resolved) };
    assert_eq!(resolved.to_str().expect("utf8"), "/add_two_ints");

    let request = br#"{"a":1,"b":2}"#;
    let mut seq = 0u64;
    let ret = svc_send_request(
        &mut client,
        request.as_ptr(),
        request.len(),
        &mut seq,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);
    assert_eq!(seq, 1);

    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
}

#[test]
fn init_fini_argument_checks() {
    let fixture = Fixture::new("test_client_node");
    let name = CString::new("chatter").expect("cstring");
    let defaults = svc_client_get_default_options();
    let mut err = ptr::null_mut();

    let ret = svc_client_init(
        ptr::null_mut(),
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &defaults,
        &mut err,
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);
    assert_eq!(take_error(err).0, SVC_RET_INVALID_ARGUMENT);

    let mut client = svc_get_zero_initialized_client();
    let ret = svc_client_init(
        &mut client,
        ptr::null(),
        fixture.type_support,
        name.as_ptr(),
        &defaults,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    assert!(!svc_client_is_valid(ptr::null(), ptr::null()));
    let client = svc_get_zero_initialized_client();
    assert!(!svc_client_is_valid(&client, ptr::null()));

    let mut client = svc_get_zero_initialized_client();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &defaults,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);
    assert!(svc_client_is_valid(&client, ptr::null()));
    assert!(svc_client_is_valid(&client, fixture.node()));
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);

    let mut client = svc_get_zero_initialized_client();
    let invalid_node = svc_get_zero_initialized_node();
    assert!(!svc_node_is_valid(&invalid_node));
    let mut err = ptr::null_mut();
    let ret = svc_client_init(
        &mut client,
        &invalid_node,
        fixture.type_support,
        name.as_ptr(),
        &defaults,
        &mut err,
    );
    assert_eq!(ret, SVC_RET_NODE_INVALID);
    let (kind, message) = take_error(err);
    assert_eq!(kind, SVC_RET_NODE_INVALID);
    assert!(message.contains("node"), "{message}");

    let mut client = svc_get_zero_initialized_client();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        ptr::null(),
        name.as_ptr(),
        &defaults,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        ptr::null(),
        &defaults,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        ptr::null(),
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    let mut options = svc_client_get_default_options();
    options.allocator.allocate = None;
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &options,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    let mut options = svc_client_get_default_options();
    options.allocator.deallocate = None;
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &options,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    assert!(!svc_client_is_valid(&client, ptr::null()));
    assert!(svc_client_get_service_name(&client).is_null());
}

unsafe extern "C" fn failing_malloc(_size: usize, state: *mut c_void) -> *mut c_void {
    let attempts = unsafe { &*state.cast::<AtomicIsize>() };
    attempts.fetch_add(1, Ordering::SeqCst);
    ptr::null_mut()
}

unsafe extern "C" fn failing_free(_ptr: *mut c_void, _state: *mut c_void) {}

unsafe extern "C" fn failing_realloc(
    _ptr: *mut c_void,
    _size: usize,
    _state: *mut c_void,
) -> *mut c_void {
    ptr::null_mut()
}

#[test]
fn failing_allocator_is_bad_alloc() {
    let fixture = Fixture::new("test_client_node");
    let name = CString::new("chatter").expect("cstring");
    let attempts = Box::new(AtomicIsize::new(0));
    let mut options: svc_client_options = svc_client_get_default_options();
    options.allocator.allocate = Some(failing_malloc);
    options.allocator.deallocate = Some(failing_free);
    options.allocator.reallocate = Some(failing_realloc);
    options.allocator.state = (&*attempts as *const AtomicIsize).cast_mut().cast();

    let mut client: svc_client = svc_get_zero_initialized_client();
    let mut err = ptr::null_mut();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &options,
        &mut err,
    );
    assert_eq!(ret, SVC_RET_BAD_ALLOC);
    assert_eq!(take_error(err).0, SVC_RET_BAD_ALLOC);
    assert!(attempts.load(Ordering::SeqCst) > 0);
    assert!(!svc_client_is_valid(&client, ptr::null()));
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
}

#[test]
fn send_request_argument_checks() {
    let fixture = Fixture::new("sender_node");
    let mut seq = 0u64;
    let request = br#"{"a":1,"b":2}"#;

    let ret = svc_send_request(
        ptr::null_mut(),
        request.as_ptr(),
        request.len(),
        &mut seq,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    let mut zero = svc_get_zero_initialized_client();
    let ret = svc_send_request(
        &mut zero,
        request.as_ptr(),
        request.len(),
        &mut seq,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);

    let mut client = svc_get_zero_initialized_client();
    let name = CString::new("add_two_ints_checks").expect("cstring");
    let defaults = svc_client_get_default_options();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &defaults,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);

    let ret = svc_send_request(&mut client, ptr::null(), 0, &mut seq, ptr::null_mut());
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);
    let garbage = b"{not json";
    let ret = svc_send_request(
        &mut client,
        garbage.as_ptr(),
        garbage.len(),
        &mut seq,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_INVALID_ARGUMENT);
    assert_eq!(seq, 0);

    let ret = svc_send_request(
        &mut client,
        request.as_ptr(),
        request.len(),
        &mut seq,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);
    assert_eq!(seq, 1);
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
}

#[test]
fn double_init_is_rejected() {
    let fixture = Fixture::new("double_node");
    let name = CString::new("twice").expect("cstring");
    let defaults = svc_client_get_default_options();
    let mut client = svc_get_zero_initialized_client();
    let init = |client: &mut svc_client| {
        svc_client_init(
            client,
            fixture.node(),
            fixture.type_support,
            name.as_ptr(),
            &defaults,
            ptr::null_mut(),
        )
    };
    assert_eq!(init(&mut client), SVC_RET_OK);
    assert_eq!(init(&mut client), SVC_RET_INVALID_ARGUMENT);
    assert!(svc_client_is_valid(&client, ptr::null()));
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
}

#[test]
fn finalized_client_leaves_no_queued_requests() {
    let fixture = Fixture::new("queue_node");
    let name = CString::new("bounded_queue_svc").expect("cstring");
    let defaults = svc_client_get_default_options();
    let mut client = svc_get_zero_initialized_client();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &defaults,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);

    let request = br#"{"a":1,"b":2}"#;
    let mut seq = 0u64;
    let mut send = |client: &mut svc_client| {
        let ret = svc_send_request(
            client,
            request.as_ptr(),
            request.len(),
            &mut seq,
            ptr::null_mut(),
        );
        assert_eq!(ret, SVC_RET_OK);
    };
    for _ in 0..25 {
        send(&mut client);
    }
    let queued = MemoryMiddleware::shared()
        .take_requests("/bounded_queue_svc")
        .expect("take");
    assert_eq!(queued.len(), defaults.qos.depth as usize);
    assert_eq!(queued.last().map(|record| record.sequence_number), Some(25));

    for _ in 0..1000 {
        send(&mut client);
    }
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
    let left = MemoryMiddleware::shared()
        .take_requests("/bounded_queue_svc")
        .expect("take");
    assert!(left.is_empty(), "{} requests outlived the client", left.len());
}

#[derive(Default)]
struct CAllocCounter {
    live: AtomicIsize,
    calls: AtomicUsize,
}

unsafe extern "C" fn counting_malloc(size: usize, state: *mut c_void) -> *mut c_void {
    let counter = unsafe { &*state.cast::<CAllocCounter>() };
    counter.calls.fetch_add(1, Ordering::SeqCst);
    let allocate = svc_get_default_allocator().allocate.expect("default allocate");
    let block = unsafe { allocate(size, ptr::null_mut()) };
    if !block.is_null() {
        counter.live.fetch_add(1, Ordering::SeqCst);
    }
    block
}

unsafe extern "C" fn counting_free(block: *mut c_void, state: *mut c_void) {
    let counter = unsafe { &*state.cast::<CAllocCounter>() };
    counter.live.fetch_sub(1, Ordering::SeqCst);
    let deallocate = svc_get_default_allocator().deallocate.expect("default deallocate");
    unsafe { deallocate(block, ptr::null_mut()) }
}

#[test]
fn client_block_comes_from_caller_allocator() {
    let fixture = Fixture::new("alloc_node");
    let name = CString::new("counted_svc").expect("cstring");
    let counter = Box::new(CAllocCounter::default());
    let mut options = svc_client_get_default_options();
    options.allocator.allocate = Some(counting_malloc);
    options.allocator.deallocate = Some(counting_free);
    options.allocator.reallocate = None;
    options.allocator.state = (&*counter as *const CAllocCounter).cast_mut().cast();

    let mut client = svc_get_zero_initialized_client();
    let ret = svc_client_init(
        &mut client,
        fixture.node(),
        fixture.type_support,
        name.as_ptr(),
        &options,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);
    // Client block, resolved name, and the two topic names.
    assert_eq!(counter.live.load(Ordering::SeqCst), 4);

    let request = br#"{"a":1,"b":2}"#;
    let mut seq = 0u64;
    let ret = svc_send_request(
        &mut client,
        request.as_ptr(),
        request.len(),
        &mut seq,
        ptr::null_mut(),
    );
    assert_eq!(ret, SVC_RET_OK);
    assert_eq!(svc_client_fini(&mut client, fixture.node(), ptr::null_mut()), SVC_RET_OK);
    assert_eq!(counter.live.load(Ordering::SeqCst), 0);
    assert!(counter.calls.load(Ordering::SeqCst) >= 4);
}
