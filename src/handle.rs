//! Reference-counted holder of one native interface pointer.
use crate::abi::{add_ref_raw, query_raw, release_raw, HResult, NativeHeader, E_NOINTERFACE, S_OK};
use crate::error::BridgeError;
use crate::iid::Iid;
use std::ffi::c_void;
use std::fmt::{self, Debug, Formatter};
use std::ptr::NonNull;

/// Owns exactly one add-ref on a native interface pointer and releases it on
/// drop. Cloning takes an additional reference.
pub struct ComRef {
    ptr: NonNull<NativeHeader>,
}

// The bridge targets the free-threaded model: every wrapper it produces
// carries the agile marker, and foreign pointers handed to it are required
// by contract to tolerate cross-thread access.
unsafe impl Send for ComRef {}
unsafe impl Sync for ComRef {}

impl ComRef {
    /// Take ownership of a raw pointer without taking a new reference.
    ///
    /// # Safety
    /// `ptr` must be null or a valid native interface pointer whose vtable
    /// begins with the base protocol, with one outstanding reference the
    /// caller transfers to the handle.
    pub unsafe fn from_raw(ptr: *mut NativeHeader) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// Take ownership of a raw pointer, taking a new reference first.
    ///
    /// # Safety
    /// `ptr` must be null or a valid native interface pointer.
    pub unsafe fn from_raw_add_ref(ptr: *mut NativeHeader) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        add_ref_raw(ptr);
        Self::from_raw(ptr)
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut NativeHeader {
        self.ptr.as_ptr()
    }

    /// Relinquish ownership of the handle's reference to the caller.
    #[inline]
    pub fn into_raw(self) -> *mut NativeHeader {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Negotiate an interface, returning an owning handle on success.
    pub fn query(&self, iid: &Iid) -> Result<ComRef, BridgeError> {
        let mut out: *mut c_void = std::ptr::null_mut();
        let hr = unsafe { query_raw(self.as_ptr(), iid, &mut out) };
        match hr {
            S_OK => {
                // The callee handed us a referenced pointer; adopt it.
                unsafe { ComRef::from_raw(out as *mut NativeHeader) }
                    .ok_or(BridgeError::NullArgument)
            }
            E_NOINTERFACE => Err(BridgeError::InterfaceNotSupported(*iid)),
            hr => Err(BridgeError::Forwarded(hr)),
        }
    }

    /// Raw query that surfaces the status code directly.
    pub fn query_raw(&self, iid: &Iid, out: *mut *mut c_void) -> HResult {
        unsafe { query_raw(self.as_ptr(), iid, out) }
    }
}

impl Clone for ComRef {
    fn clone(&self) -> Self {
        unsafe { add_ref_raw(self.ptr.as_ptr()) };
        Self { ptr: self.ptr }
    }
}

impl Drop for ComRef {
    fn drop(&mut self) {
        unsafe { release_raw(self.ptr.as_ptr()) };
    }
}

impl Debug for ComRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ComRef({:p})", self.ptr.as_ptr())
    }
}

impl PartialEq for ComRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}
impl Eq for ComRef {}
