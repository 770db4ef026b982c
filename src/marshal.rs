//! Cross-apartment marshaling adapter.
//!
//! The bridge does not implement the marshaling transport. It pairs the
//! platform's free-threaded marshaler with a handle to the object being
//! marshaled and exposes a dispatch table whose five marshaling methods are
//! verbatim pass-throughs; their status codes cross unmodified. Negotiation
//! on the adapter answers the marshaling interface itself and forwards
//! everything else to the wrapped reference's own query path, so identity
//! rules are preserved.
use crate::abi::{HResult, MarshalVtbl, NativeHeader, UnknownVtbl, E_POINTER, S_OK};
use crate::error::BridgeError;
use crate::handle::ComRef;
use crate::iid::{Iid, IID_MARSHAL};
use crate::platform;
use crate::wrapper::{guard_shim, head_from, WrapperHead, WrapperKind};
use std::ffi::c_void;
use std::sync::atomic::{fence, Ordering};

#[repr(C)]
struct MarshalProxy {
    head: WrapperHead,
    platform: ComRef,
    target: ComRef,
}

const _: () = assert!(std::mem::offset_of!(MarshalProxy, head) == 0);

static MARSHAL_VTABLE: MarshalVtbl = MarshalVtbl {
    base: UnknownVtbl {
        query_interface: proxy_query_interface,
        add_ref: proxy_add_ref,
        release: proxy_release,
    },
    get_unmarshal_class: proxy_get_unmarshal_class,
    get_marshal_size_max: proxy_get_marshal_size_max,
    marshal_interface: proxy_marshal_interface,
    unmarshal_interface: proxy_unmarshal_interface,
    release_marshal_data: proxy_release_marshal_data,
};

/// Adapt `target` for cross-apartment use.
///
/// Fails only if the platform cannot produce a free-threaded marshaler,
/// which is a configuration error, not a recoverable condition.
pub fn marshal_for(target: ComRef) -> Result<ComRef, BridgeError> {
    let platform = platform::create_free_threaded_marshaler()?;
    let platform = platform
        .query(&IID_MARSHAL)
        .map_err(|e| BridgeError::MarshalerUnavailable(e.to_string()))?;

    let raw = Box::into_raw(Box::new(MarshalProxy {
        head: WrapperHead::new(
            &MARSHAL_VTABLE as *const MarshalVtbl as *const c_void,
            WrapperKind::Marshal,
        ),
        platform,
        target,
    }));
    unsafe {
        (*raw).head.header.backref = raw as *const c_void;
        Ok(ComRef::from_raw((*raw).head.header_ptr()).expect("proxy header is never null"))
    }
}

/// # Safety
/// `this` must be the embedded header of a live marshal proxy.
unsafe fn proxy_from<'a>(this: *mut NativeHeader) -> &'a MarshalProxy {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::Marshal);
    unsafe { &*(head as *const WrapperHead as *const MarshalProxy) }
}

/// The platform marshaler's own dispatch table.
unsafe fn platform_vtbl(proxy: &MarshalProxy) -> &MarshalVtbl {
    unsafe { &*((*proxy.platform.as_ptr()).vtable as *const MarshalVtbl) }
}

unsafe extern "system" fn proxy_query_interface(
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
        let proxy = unsafe { proxy_from(this) };
        if requested == IID_MARSHAL {
            proxy.head.refs.fetch_add(1, Ordering::Relaxed);
            unsafe { out.write(this as *mut c_void) };
            return S_OK;
        }
        proxy.target.query_raw(&requested, out)
    })
}

unsafe extern "system" fn proxy_add_ref(this: *mut NativeHeader) -> u32 {
    let proxy = unsafe { proxy_from(this) };
    (proxy.head.refs.fetch_add(1, Ordering::Relaxed) + 1) as u32
}

unsafe extern "system" fn proxy_release(this: *mut NativeHeader) -> u32 {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::Marshal);
    let me = head as *const WrapperHead as *mut MarshalProxy;
    let prev = unsafe { (*me).head.refs.fetch_sub(1, Ordering::Release) };
    debug_assert!(prev != 0, "release on a dead marshal proxy");
    if prev != 1 {
        return (prev - 1) as u32;
    }
    fence(Ordering::Acquire);
    drop(unsafe { Box::from_raw(me) });
    0
}

unsafe extern "system" fn proxy_get_unmarshal_class(
    this: *mut NativeHeader,
    iid: *const Iid,
    pv: *mut c_void,
    dest_context: u32,
    pv_dest: *mut c_void,
    flags: u32,
    out_class: *mut Iid,
) -> HResult {
    let proxy = unsafe { proxy_from(this) };
    unsafe {
        (platform_vtbl(proxy).get_unmarshal_class)(
            proxy.platform.as_ptr(),
            iid,
            pv,
            dest_context,
            pv_dest,
            flags,
            out_class,
        )
    }
}

unsafe extern "system" fn proxy_get_marshal_size_max(
    this: *mut NativeHeader,
    iid: *const Iid,
    pv: *mut c_void,
    dest_context: u32,
    pv_dest: *mut c_void,
    flags: u32,
    out_size: *mut u32,
) -> HResult {
    let proxy = unsafe { proxy_from(this) };
    unsafe {
        (platform_vtbl(proxy).get_marshal_size_max)(
            proxy.platform.as_ptr(),
            iid,
            pv,
            dest_context,
            pv_dest,
            flags,
            out_size,
        )
    }
}

unsafe extern "system" fn proxy_marshal_interface(
    this: *mut NativeHeader,
    stream: *mut c_void,
    iid: *const Iid,
    pv: *mut c_void,
    dest_context: u32,
    pv_dest: *mut c_void,
    flags: u32,
) -> HResult {
    let proxy = unsafe { proxy_from(this) };
    unsafe {
        (platform_vtbl(proxy).marshal_interface)(
            proxy.platform.as_ptr(),
            stream,
            iid,
            pv,
            dest_context,
            pv_dest,
            flags,
        )
    }
}

unsafe extern "system" fn proxy_unmarshal_interface(
    this: *mut NativeHeader,
    stream: *mut c_void,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    let proxy = unsafe { proxy_from(this) };
    unsafe {
        (platform_vtbl(proxy).unmarshal_interface)(proxy.platform.as_ptr(), stream, iid, out)
    }
}

unsafe extern "system" fn proxy_release_marshal_data(
    this: *mut NativeHeader,
    stream: *mut c_void,
) -> HResult {
    let proxy = unsafe { proxy_from(this) };
    unsafe { (platform_vtbl(proxy).release_marshal_data)(proxy.platform.as_ptr(), stream) }
}
