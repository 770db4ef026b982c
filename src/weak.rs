//! Weak references: observing managed lifetime without extending it.
//!
//! A weak wrapper is an independent native object (its own identity, its own
//! reference count) holding a non-owning relation to one managed object.
//! Resolving after the target died is success with no object, never an
//! error, and holding the wrapper never increments the managed retain.
use crate::abi::{
    HResult, NativeHeader, UnknownVtbl, WeakReferenceSourceVtbl, WeakReferenceVtbl, E_NOINTERFACE,
    E_POINTER, S_OK,
};
use crate::handle::ComRef;
use crate::iid::{is_universal, Iid, IID_WEAK_REFERENCE};
use crate::object::{ManagedRef, RuntimeObject};
use crate::wrapper::{guard_shim, head_from, tear_off_payload, ComWrapper, WrapperHead, WrapperKind, TEAR_OFF_BASE};
use std::ffi::c_void;
use std::sync::atomic::{fence, Ordering};
use std::sync::{Arc, Weak};

#[repr(C)]
struct WeakWrapper {
    head: WrapperHead,
    target: Weak<dyn RuntimeObject>,
}

const _: () = assert!(std::mem::offset_of!(WeakWrapper, head) == 0);

static WEAK_VTABLE: WeakReferenceVtbl = WeakReferenceVtbl {
    base: UnknownVtbl {
        query_interface: weak_query_interface,
        add_ref: weak_add_ref,
        release: weak_release,
    },
    resolve: weak_resolve,
};

/// Wrap a non-owning relation to `target` as a native weak reference.
pub fn create_weak_reference(target: &ManagedRef) -> ComRef {
    let raw = Box::into_raw(Box::new(WeakWrapper {
        head: WrapperHead::new(
            &WEAK_VTABLE as *const WeakReferenceVtbl as *const c_void,
            WrapperKind::Weak,
        ),
        target: Arc::downgrade(target),
    }));
    unsafe {
        (*raw).head.header.backref = raw as *const c_void;
        ComRef::from_raw((*raw).head.header_ptr()).expect("weak wrapper header is never null")
    }
}

/// # Safety
/// `this` must be the embedded header of a live weak wrapper.
unsafe fn weak_from<'a>(this: *mut NativeHeader) -> &'a WeakWrapper {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::Weak);
    unsafe { &*(head as *const WrapperHead as *const WeakWrapper) }
}

unsafe extern "system" fn weak_query_interface(
    this: *mut NativeHeader,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    guard_shim(|| {
        if iid.is_null() || out.is_null() {
            return E_POINTER;
        }
        let requested = unsafe { *iid };
        unsafe { out.write(std::ptr::null_mut()) };
        // A weak wrapper is its own identity; it answers the weak-reference
        // interface and the universal set, nothing else.
        if requested == IID_WEAK_REFERENCE || is_universal(&requested) {
            let weak = unsafe { weak_from(this) };
            weak.head.refs.fetch_add(1, Ordering::Relaxed);
            unsafe { out.write(this as *mut c_void) };
            S_OK
        } else {
            E_NOINTERFACE
        }
    })
}

unsafe extern "system" fn weak_add_ref(this: *mut NativeHeader) -> u32 {
    let weak = unsafe { weak_from(this) };
    (weak.head.refs.fetch_add(1, Ordering::Relaxed) + 1) as u32
}

unsafe extern "system" fn weak_release(this: *mut NativeHeader) -> u32 {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::Weak);
    let me = head as *const WrapperHead as *mut WeakWrapper;
    let prev = unsafe { (*me).head.refs.fetch_sub(1, Ordering::Release) };
    debug_assert!(prev != 0, "release on a dead weak wrapper");
    if prev != 1 {
        return (prev - 1) as u32;
    }
    fence(Ordering::Acquire);
    drop(unsafe { Box::from_raw(me) });
    0
}

unsafe extern "system" fn weak_resolve(
    this: *mut NativeHeader,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    guard_shim(|| {
        if iid.is_null() || out.is_null() {
            return E_POINTER;
        }
        unsafe { out.write(std::ptr::null_mut()) };
        let weak = unsafe { weak_from(this) };
        match weak.target.upgrade() {
            // Dead target: no object, and that is success.
            None => S_OK,
            Some(live) => {
                let strong = ComWrapper::wrap_ref(&live);
                strong.query_raw(unsafe { &*iid }, out)
            }
        }
    })
}

/// Tear-off surface letting any identity wrapper hand out weak references.
pub(crate) static WEAK_SOURCE_VTABLE: WeakReferenceSourceVtbl = WeakReferenceSourceVtbl {
    base: TEAR_OFF_BASE,
    get_weak_reference: source_get_weak_reference,
};

unsafe extern "system" fn source_get_weak_reference(
    this: *mut NativeHeader,
    out: *mut *mut c_void,
) -> HResult {
    guard_shim(|| {
        if out.is_null() {
            return E_POINTER;
        }
        let payload = unsafe { tear_off_payload(this) };
        let weak = create_weak_reference(payload);
        unsafe { out.write(weak.into_raw() as *mut c_void) };
        S_OK
    })
}
