//! Purpose: Caller-supplied allocation policy and the memory blocks it hands out.
//! Exports: `Allocator`, `AllocatorState`, `AllocatedBytes`, `AllocatedStr`, `AllocatedBox`.
//! Role: Every allocation a client performs goes through the policy it was created with.
//! Invariants: A policy is usable only when `allocate` and `deallocate` are present.
//! Invariants: Blocks release themselves through the policy that produced them.
//! Notes: Zero-sized requests never reach the policy.

use crate::core::error::{Error, ErrorKind};
use std::alloc::Layout;
use std::any::Any;
use std::ffi::c_char;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

pub type AllocateFn = fn(Layout, &AllocatorState) -> Option<NonNull<u8>>;
pub type DeallocateFn = unsafe fn(NonNull<u8>, Layout, &AllocatorState);
pub type ReallocateFn =
    unsafe fn(NonNull<u8>, Layout, usize, &AllocatorState) -> Option<NonNull<u8>>;

/// Opaque context handed to every allocator call.
#[derive(Clone, Default)]
pub struct AllocatorState(Option<Arc<dyn Any + Send + Sync>>);

impl AllocatorState {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(Some(value))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for AllocatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_some() {
            f.write_str("AllocatorState(..)")
        } else {
            f.write_str("AllocatorState(empty)")
        }
    }
}

#[derive(Clone)]
pub struct Allocator {
    pub allocate: Option<AllocateFn>,
    pub deallocate: Option<DeallocateFn>,
    pub reallocate: Option<ReallocateFn>,
    pub state: AllocatorState,
}

impl Allocator {
    /// Structural completeness: `reallocate` may be absent.
    pub fn is_valid(&self) -> bool {
        self.allocate.is_some() && self.deallocate.is_some()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.allocate.is_none() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("allocator is missing allocate"));
        }
        if self.deallocate.is_none() {
            return Err(Error::new(ErrorKind::InvalidArgument)
                .with_message("allocator is missing deallocate"));
        }
        Ok(())
    }

    pub fn alloc_bytes(&self, bytes: &[u8]) -> Result<AllocatedBytes, Error> {
        let mut block = AllocatedBytes::empty(self.clone());
        if bytes.is_empty() {
            return Ok(block);
        }
        let ptr = self.raw_allocate(bytes.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        block.ptr = ptr;
        block.len = bytes.len();
        Ok(block)
    }

    pub fn alloc_str(&self, value: &str) -> Result<AllocatedStr, Error> {
        let mut with_nul = Vec::with_capacity(value.len() + 1);
        with_nul.extend_from_slice(value.as_bytes());
        with_nul.push(0);
        Ok(AllocatedStr {
            bytes: self.alloc_bytes(&with_nul)?,
        })
    }

    /// Moves `value` into a block from this policy; the block remembers the policy.
    pub fn alloc_box<T>(&self, value: T) -> Result<AllocatedBox<T>, Error> {
        self.validate()?;
        let layout = Layout::new::<BoxSlot<T>>();
        let allocate = self.allocate.ok_or_else(missing_allocate)?;
        let raw = allocate(layout, &self.state).ok_or_else(|| {
            Error::new(ErrorKind::BadAlloc)
                .with_message(format!("failed to allocate {} bytes", layout.size()))
        })?;
        if raw.as_ptr().align_offset(layout.align()) != 0 {
            if let Some(deallocate) = self.deallocate {
                unsafe { deallocate(raw, layout, &self.state) };
            }
            return Err(Error::new(ErrorKind::BadAlloc)
                .with_message(format!("allocator returned a block not aligned to {}", layout.align())));
        }
        let slot = raw.cast::<BoxSlot<T>>();
        unsafe {
            slot.as_ptr().write(BoxSlot {
                allocator: self.clone(),
                value,
            });
        }
        Ok(AllocatedBox { slot })
    }

    fn raw_allocate(&self, size: usize) -> Result<NonNull<u8>, Error> {
        self.validate()?;
        let layout = byte_layout(size)?;
        let allocate = self.allocate.ok_or_else(missing_allocate)?;
        allocate(layout, &self.state).ok_or_else(|| {
            Error::new(ErrorKind::BadAlloc).with_message(format!("failed to allocate {size} bytes"))
        })
    }
}

impl Default for Allocator {
    fn default() -> Self {
        default_allocator()
    }
}

impl fmt::Debug for Allocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocator")
            .field("allocate", &self.allocate.is_some())
            .field("deallocate", &self.deallocate.is_some())
            .field("reallocate", &self.reallocate.is_some())
            .field("state", &self.state)
            .finish()
    }
}

/// Policy backed by the global Rust allocator.
pub fn default_allocator() -> Allocator {
    Allocator {
        allocate: Some(default_allocate),
        deallocate: Some(default_deallocate),
        reallocate: Some(default_reallocate),
        state: AllocatorState::default(),
    }
}

fn default_allocate(layout: Layout, _state: &AllocatorState) -> Option<NonNull<u8>> {
    if layout.size() == 0 {
        return None;
    }
    NonNull::new(unsafe { std::alloc::alloc(layout) })
}

unsafe fn default_deallocate(ptr: NonNull<u8>, layout: Layout, _state: &AllocatorState) {
    unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
}

unsafe fn default_reallocate(
    ptr: NonNull<u8>,
    layout: Layout,
    new_size: usize,
    _state: &AllocatorState,
) -> Option<NonNull<u8>> {
    if new_size == 0 {
        return None;
    }
    NonNull::new(unsafe { std::alloc::realloc(ptr.as_ptr(), layout, new_size) })
}

fn byte_layout(size: usize) -> Result<Layout, Error> {
    Layout::array::<u8>(size).map_err(|err| {
        Error::new(ErrorKind::BadAlloc)
            .with_message("allocation size overflow")
            .with_source(err)
    })
}

fn missing_allocate() -> Error {
    Error::new(ErrorKind::InvalidArgument).with_message("allocator is missing allocate")
}

/// Byte block owned through an `Allocator`.
pub struct AllocatedBytes {
    ptr: NonNull<u8>,
    len: usize,
    allocator: Allocator,
}

// The block is exclusively owned; the policy is plain fn pointers plus shared state.
unsafe impl Send for AllocatedBytes {}
unsafe impl Sync for AllocatedBytes {}

impl AllocatedBytes {
    fn empty(allocator: Allocator) -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            allocator,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Appends `more`, growing through `reallocate` when the policy has one.
    pub fn extend_from_slice(&mut self, more: &[u8]) -> Result<(), Error> {
        if more.is_empty() {
            return Ok(());
        }
        if self.len == 0 {
            let grown = self.allocator.alloc_bytes(more)?;
            *self = grown;
            return Ok(());
        }
        let new_len = self
            .len
            .checked_add(more.len())
            .ok_or_else(|| Error::new(ErrorKind::BadAlloc).with_message("allocation size overflow"))?;
        let old_layout = byte_layout(self.len)?;
        byte_layout(new_len)?;
        let ptr = match self.allocator.reallocate {
            Some(reallocate) => {
                let moved = unsafe { reallocate(self.ptr, old_layout, new_len, &self.allocator.state) };
                moved.ok_or_else(|| {
                    Error::new(ErrorKind::BadAlloc)
                        .with_message(format!("failed to reallocate {new_len} bytes"))
                })?
            }
            None => {
                let fresh = self.allocator.raw_allocate(new_len)?;
                unsafe {
                    std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), fresh.as_ptr(), self.len);
                }
                self.release();
                fresh
            }
        };
        unsafe {
            std::ptr::copy_nonoverlapping(more.as_ptr(), ptr.as_ptr().add(self.len), more.len());
        }
        self.ptr = ptr;
        self.len = new_len;
        Ok(())
    }

    fn release(&mut self) {
        if self.len == 0 {
            return;
        }
        if let (Some(deallocate), Ok(layout)) = (self.allocator.deallocate, byte_layout(self.len)) {
            unsafe { deallocate(self.ptr, layout, &self.allocator.state) };
        }
        self.ptr = NonNull::dangling();
        self.len = 0;
    }
}

impl Drop for AllocatedBytes {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for AllocatedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatedBytes")
            .field("len", &self.len)
            .finish()
    }
}

/// UTF-8 string owned through an `Allocator`, stored with a trailing NUL.
pub struct AllocatedStr {
    bytes: AllocatedBytes,
}

impl AllocatedStr {
    pub fn as_str(&self) -> &str {
        let bytes = self.bytes.as_slice();
        let text = &bytes[..bytes.len().saturating_sub(1)];
        // Built only from `&str` input in `alloc_str` and `push_str`.
        unsafe { std::str::from_utf8_unchecked(text) }
    }

    pub fn as_c_ptr(&self) -> *const c_char {
        self.bytes.as_slice().as_ptr().cast()
    }

    pub fn push_str(&mut self, more: &str) -> Result<(), Error> {
        let mut tail = Vec::with_capacity(more.len() + 1);
        tail.extend_from_slice(more.as_bytes());
        tail.push(0);
        let nul_at = self.bytes.len().saturating_sub(1);
        // Overwrite the current NUL with the first byte of the extension.
        self.bytes.extend_from_slice(&tail[1..])?;
        if !more.is_empty() {
            unsafe {
                *self.bytes.ptr.as_ptr().add(nul_at) = tail[0];
            }
        }
        Ok(())
    }
}

impl fmt::Debug for AllocatedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for AllocatedStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage of an `AllocatedBox`: the value plus the policy that must free it.
pub struct BoxSlot<T> {
    allocator: Allocator,
    value: T,
}

impl<T> BoxSlot<T> {
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Single value owned through an `Allocator`.
pub struct AllocatedBox<T> {
    slot: NonNull<BoxSlot<T>>,
}

unsafe impl<T: Send> Send for AllocatedBox<T> {}
unsafe impl<T: Sync> Sync for AllocatedBox<T> {}

impl<T> AllocatedBox<T> {
    /// Hands ownership to a raw pointer; undo with `from_raw`.
    pub fn into_raw(self) -> NonNull<BoxSlot<T>> {
        let slot = self.slot;
        std::mem::forget(self);
        slot
    }

    /// # Safety
    /// `slot` must come from `into_raw` and must not be used afterwards.
    pub unsafe fn from_raw(slot: NonNull<BoxSlot<T>>) -> Self {
        Self { slot }
    }
}

impl<T> std::ops::Deref for AllocatedBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &self.slot.as_ref().value }
    }
}

impl<T> std::ops::DerefMut for AllocatedBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut self.slot.as_mut().value }
    }
}

impl<T> Drop for AllocatedBox<T> {
    fn drop(&mut self) {
        let slot = self.slot.as_ptr();
        unsafe {
            let allocator = std::ptr::read(&(*slot).allocator);
            std::ptr::drop_in_place(&mut (*slot).value);
            if let Some(deallocate) = allocator.deallocate {
                deallocate(self.slot.cast(), Layout::new::<BoxSlot<T>>(), &allocator.state);
            }
        }
    }
}
