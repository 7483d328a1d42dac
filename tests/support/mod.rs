// Allocator harness shared by the contract tests: counts live blocks and can fail on demand.
#![allow(dead_code)]
use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

use svclient::api::{Allocator, AllocatorState, default_allocator};

#[derive(Default)]
pub struct AllocCounter {
    live: AtomicIsize,
    allocations: AtomicUsize,
    budget: Option<usize>,
}

impl AllocCounter {
    pub fn live(&self) -> isize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

fn counting_allocate(layout: Layout, state: &AllocatorState) -> Option<NonNull<u8>> {
    let counter = state.downcast_ref::<AllocCounter>()?;
    let attempt = counter.allocations.fetch_add(1, Ordering::SeqCst);
    if counter.budget.is_some_and(|budget| attempt >= budget) {
        return None;
    }
    let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) })?;
    counter.live.fetch_add(1, Ordering::SeqCst);
    Some(ptr)
}

unsafe fn counting_deallocate(ptr: NonNull<u8>, layout: Layout, state: &AllocatorState) {
    if let Some(counter) = state.downcast_ref::<AllocCounter>() {
        counter.live.fetch_sub(1, Ordering::SeqCst);
    }
    unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
}

/// Allocator whose allocations succeed `budget` times, then fail (`None` = never fails).
pub fn counting_allocator(budget: Option<usize>) -> (Allocator, Arc<AllocCounter>) {
    let counter = Arc::new(AllocCounter {
        budget,
        ..AllocCounter::default()
    });
    let allocator = Allocator {
        allocate: Some(counting_allocate),
        deallocate: Some(counting_deallocate),
        reallocate: None,
        state: AllocatorState::from_arc(counter.clone()),
    };
    (allocator, counter)
}

pub fn failing_allocator() -> (Allocator, Arc<AllocCounter>) {
    counting_allocator(Some(0))
}

pub fn allocator_without_allocate() -> Allocator {
    let mut allocator = default_allocator();
    allocator.allocate = None;
    allocator
}

pub fn allocator_without_deallocate() -> Allocator {
    let mut allocator = default_allocator();
    allocator.deallocate = None;
    allocator
}
