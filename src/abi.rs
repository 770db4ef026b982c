//! Fixed binary layouts of the base protocol.
//!
//! Every native-visible object begins with a [`NativeHeader`]: a pointer to a
//! dispatch table whose first three entries are, in order, the query, add-ref
//! and release operations, followed by a typed back-reference slot owned by
//! the bridge. The header's address is the object's native identity.
//!
//! All tables here are `#[repr(C)]` structs of `extern "system"` function
//! pointers; their layouts are pinned by the const assertions at the bottom
//! of this module.
use crate::iid::Iid;
use std::ffi::{c_char, c_void};

/// Platform status code. Negative values are failures.
pub type HResult = i32;

pub const S_OK: HResult = 0;
pub const E_NOINTERFACE: HResult = 0x8000_4002_u32 as i32;
pub const E_POINTER: HResult = 0x8000_4003_u32 as i32;
pub const E_FAIL: HResult = 0x8000_4005_u32 as i32;

pub fn succeeded(hr: HResult) -> bool {
    hr >= 0
}

/// Trust level reported by the base introspection interface.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustLevel {
    Base = 0,
    Partial = 1,
    Full = 2,
}

/// The fixed-layout prefix of every native-visible object.
///
/// `vtable` is what foreign callers see; `backref` is the bridge's private
/// slot pointing at the wrapper that owns this header. Foreign objects do
/// not have the slot, which is why recovery always goes through the
/// marker-identifier probe first and never reads `backref` speculatively.
#[repr(C)]
pub struct NativeHeader {
    pub(crate) vtable: *const c_void,
    pub(crate) backref: *const c_void,
}

impl NativeHeader {
    /// Header for a native object with the given dispatch table. The
    /// back-reference slot starts null; the bridge fills it only for its own
    /// wrappers, and never reads it on anything that fails the marker probe.
    pub fn new(vtable: *const c_void) -> Self {
        Self {
            vtable,
            backref: std::ptr::null(),
        }
    }
}

/// The three-method header every dispatch table begins with.
#[repr(C)]
pub struct UnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut NativeHeader, *const Iid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "system" fn(*mut NativeHeader) -> u32,
    pub release: unsafe extern "system" fn(*mut NativeHeader) -> u32,
}

/// Base introspection table. The class name is returned as a `'static`
/// NUL-terminated UTF-8 string; string-handle marshaling is out of scope.
#[repr(C)]
pub struct InspectableVtbl {
    pub base: UnknownVtbl,
    pub get_iids: unsafe extern "system" fn(*mut NativeHeader, *mut u32, *mut *mut Iid) -> HResult,
    pub get_runtime_class_name:
        unsafe extern "system" fn(*mut NativeHeader, *mut *const c_char) -> HResult,
    pub get_trust_level: unsafe extern "system" fn(*mut NativeHeader, *mut TrustLevel) -> HResult,
}

/// Weak reference: resolve to a strong reference of the requested shape, or
/// null if the target is gone.
#[repr(C)]
pub struct WeakReferenceVtbl {
    pub base: UnknownVtbl,
    pub resolve:
        unsafe extern "system" fn(*mut NativeHeader, *const Iid, *mut *mut c_void) -> HResult,
}

/// Source from which a weak reference can be obtained.
#[repr(C)]
pub struct WeakReferenceSourceVtbl {
    pub base: UnknownVtbl,
    pub get_weak_reference:
        unsafe extern "system" fn(*mut NativeHeader, *mut *mut c_void) -> HResult,
}

/// Cross-apartment marshaling protocol. The bridge never interprets these
/// calls; they are forwarded verbatim to the platform marshaler.
#[repr(C)]
pub struct MarshalVtbl {
    pub base: UnknownVtbl,
    pub get_unmarshal_class: unsafe extern "system" fn(
        *mut NativeHeader,
        *const Iid,
        *mut c_void,
        u32,
        *mut c_void,
        u32,
        *mut Iid,
    ) -> HResult,
    pub get_marshal_size_max: unsafe extern "system" fn(
        *mut NativeHeader,
        *const Iid,
        *mut c_void,
        u32,
        *mut c_void,
        u32,
        *mut u32,
    ) -> HResult,
    pub marshal_interface: unsafe extern "system" fn(
        *mut NativeHeader,
        *mut c_void,
        *const Iid,
        *mut c_void,
        u32,
        *mut c_void,
        u32,
    ) -> HResult,
    pub unmarshal_interface: unsafe extern "system" fn(
        *mut NativeHeader,
        *mut c_void,
        *const Iid,
        *mut *mut c_void,
    ) -> HResult,
    pub release_marshal_data:
        unsafe extern "system" fn(*mut NativeHeader, *mut c_void) -> HResult,
}

/// Invoke the query operation through an arbitrary interface pointer.
///
/// # Safety
/// `ptr` must be a valid native interface pointer whose vtable begins with
/// [`UnknownVtbl`].
pub unsafe fn query_raw(
    ptr: *mut NativeHeader,
    iid: &Iid,
    out: *mut *mut c_void,
) -> HResult {
    let vtbl = (*ptr).vtable as *const UnknownVtbl;
    ((*vtbl).query_interface)(ptr, iid, out)
}

/// Invoke the add-ref operation through an arbitrary interface pointer.
///
/// # Safety
/// As [`query_raw`].
pub unsafe fn add_ref_raw(ptr: *mut NativeHeader) -> u32 {
    let vtbl = (*ptr).vtable as *const UnknownVtbl;
    ((*vtbl).add_ref)(ptr)
}

/// Invoke the release operation through an arbitrary interface pointer.
///
/// # Safety
/// As [`query_raw`]; consumes one reference owned by the caller.
pub unsafe fn release_raw(ptr: *mut NativeHeader) -> u32 {
    let vtbl = (*ptr).vtable as *const UnknownVtbl;
    ((*vtbl).release)(ptr)
}

// The vtable pointer must sit at offset 0 (that is what foreign callers
// index through) and the back-reference slot immediately after it, at a
// fixed offset the recovery path can rely on.
const _: () = {
    assert!(std::mem::offset_of!(NativeHeader, vtable) == 0);
    assert!(std::mem::offset_of!(NativeHeader, backref) == std::mem::size_of::<*const c_void>());
    assert!(std::mem::size_of::<UnknownVtbl>() == 3 * std::mem::size_of::<usize>());
    assert!(std::mem::offset_of!(InspectableVtbl, base) == 0);
    assert!(std::mem::offset_of!(WeakReferenceVtbl, base) == 0);
    assert!(std::mem::offset_of!(WeakReferenceSourceVtbl, base) == 0);
    assert!(std::mem::offset_of!(MarshalVtbl, base) == 0);
};
