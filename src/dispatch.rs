//! Interface negotiation.
//!
//! Given an identity wrapper and a requested identifier, resolution proceeds
//! in fixed order: universal identifiers are always answered by the identity
//! itself (even if the payload's capability table also claims them; the
//! pointer-equality identity rule depends on it); then the payload's declared
//! capability table; then the built-in weak-reference-source surface; then
//! the aggregation inner, which never answers universal identifiers; then
//! failure.
use crate::abi::{query_raw, HResult, E_NOINTERFACE, E_POINTER, S_OK};
use crate::handle::ComRef;
use crate::iid::{is_universal, Iid, IID_WEAK_REFERENCE_SOURCE};
use crate::object::RawVtable;
use crate::weak::WEAK_SOURCE_VTABLE;
use crate::wrapper::{ComWrapper, TearOff};
use std::ffi::c_void;

pub(crate) fn query_identity(
    wrapper: &ComWrapper,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    if iid.is_null() || out.is_null() {
        return E_POINTER;
    }
    let requested = unsafe { *iid };
    unsafe { out.write(std::ptr::null_mut()) };

    if is_universal(&requested) {
        wrapper.add_ref();
        unsafe { out.write(wrapper.header_ptr() as *mut c_void) };
        return S_OK;
    }

    if let Some(table) = wrapper.payload().capabilities() {
        if let Some(vtable) = table.lookup(&requested) {
            unsafe { out.write(make_tear_off(wrapper, vtable, requested)) };
            return S_OK;
        }
    }

    // Every identity wrapper can hand out a weak-reference source; a payload
    // that declares its own implementation has already won above.
    if requested == IID_WEAK_REFERENCE_SOURCE {
        let vtable = RawVtable(&WEAK_SOURCE_VTABLE as *const _ as *const c_void);
        unsafe { out.write(make_tear_off(wrapper, vtable, requested)) };
        return S_OK;
    }

    if let Some(inner) = wrapper.payload().aggregation().and_then(|a| a.inner()) {
        return unsafe { query_raw(inner.as_ptr(), &requested, out) };
    }

    E_NOINTERFACE
}

fn make_tear_off(wrapper: &ComWrapper, vtable: RawVtable, iid: Iid) -> *mut c_void {
    let identity = unsafe { ComRef::from_raw_add_ref(wrapper.header_ptr()) }
        .expect("identity header is never null");
    TearOff::create(vtable, iid, identity, wrapper.payload().clone()) as *mut c_void
}
