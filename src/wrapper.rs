//! The wrapper pairing a managed payload with a native-visible header.
//!
//! A managed object enters the native world exactly once: [`ComWrapper::wrap`]
//! either revives the object's existing wrapper or allocates a new one whose
//! embedded header is the object's native identity from then on. The foreign
//! reference count tracked in the wrapper controls its lifetime; while it is
//! nonzero the wrapper holds the managed retain, so the managed object can
//! never die before its last native holder lets go.
//!
//! Recovery in the other direction goes through the private marker
//! identifier: pointers this bridge produced answer the probe and are read
//! back through the typed back-reference slot; foreign pointers do not, and
//! are adapted through a managed proxy de-duplicated per native identity.
use crate::abi::{
    query_raw, release_raw, HResult, InspectableVtbl, NativeHeader, TrustLevel, UnknownVtbl,
    E_FAIL, E_POINTER, S_OK,
};
use crate::dispatch;
use crate::error::BridgeError;
use crate::handle::ComRef;
use crate::iid::{is_universal, Iid, IID_BRIDGE_IDENTITY, IID_UNKNOWN};
use crate::object::{managed_key, ManagedRef, RawVtable};
use crate::registry::ClassFactory;
use dashmap::{mapref::entry::Entry, DashMap};
use once_cell::sync::{Lazy, OnceCell};
use std::ffi::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

/// Discriminates the wrapper kinds sharing the [`WrapperHead`] prefix, so the
/// recovery path knows what it is looking at before casting further.
#[repr(u32)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WrapperKind {
    Identity,
    TearOff,
    Weak,
    Marshal,
}

/// Common prefix of every wrapper allocation. The back-reference slot in the
/// embedded header points at this prefix (which is also the allocation
/// start), never at anything else.
#[repr(C)]
pub(crate) struct WrapperHead {
    pub(crate) header: NativeHeader,
    pub(crate) refs: AtomicUsize,
    pub(crate) kind: WrapperKind,
}

impl WrapperHead {
    pub(crate) fn new(vtable: *const c_void, kind: WrapperKind) -> Self {
        Self {
            header: NativeHeader::new(vtable),
            refs: AtomicUsize::new(1),
            kind,
        }
    }

    pub(crate) fn header_ptr(&self) -> *mut NativeHeader {
        &self.header as *const NativeHeader as *mut NativeHeader
    }
}

/// Recover the wrapper prefix behind a header this bridge produced.
///
/// A missing back-reference means the identity invariant is already broken;
/// continuing would hand out wrong payloads, so fail fast.
///
/// # Safety
/// `this` must point at the embedded header of a live bridge wrapper.
pub(crate) unsafe fn head_from<'a>(this: *mut NativeHeader) -> &'a WrapperHead {
    let backref = unsafe { (*this).backref };
    if backref.is_null() {
        tracing::error!("back-reference slot missing on bridge header");
        std::process::abort();
    }
    unsafe { &*(backref as *const WrapperHead) }
}

/// Run a dispatch-table body, converting any panic escaping managed-object
/// logic into the generic failure code before it reaches the native caller.
pub(crate) fn guard_shim(f: impl FnOnce() -> HResult) -> HResult {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!("panic caught at dispatch-table boundary");
        E_FAIL
    })
}

struct WrapperPtr(*mut ComWrapper);
unsafe impl Send for WrapperPtr {}
unsafe impl Sync for WrapperPtr {}

/// Live identity wrappers, keyed by managed allocation address. Entry-level
/// locking makes concurrent first wrap and the zero-count teardown race
/// resolve to a single winner.
static LIVE_WRAPPERS: Lazy<DashMap<usize, WrapperPtr>> = Lazy::new(DashMap::new);

/// Managed proxies for foreign pointers, keyed by canonical native identity.
/// Dead entries are replaced on the next touch of the same identity.
static NATIVE_PROXIES: Lazy<DashMap<usize, std::sync::Weak<dyn crate::object::RuntimeObject>>> =
    Lazy::new(DashMap::new);

/// The unit whose lifetime the foreign reference count controls.
#[repr(C)]
pub struct ComWrapper {
    head: WrapperHead,
    // Declared (and therefore dropped) before `payload`: releasing the inner
    // may be what tears down the native resources the managed retain keeps a
    // view of.
    inner: OnceCell<ComRef>,
    payload: ManagedRef,
}

const _: () = {
    assert!(std::mem::offset_of!(ComWrapper, head) == 0);
    assert!(std::mem::offset_of!(WrapperHead, header) == 0);
};

static IDENTITY_VTABLE: InspectableVtbl = InspectableVtbl {
    base: UnknownVtbl {
        query_interface: identity_query_interface,
        add_ref: identity_add_ref,
        release: identity_release,
    },
    get_iids: identity_get_iids,
    get_runtime_class_name: identity_get_class_name,
    get_trust_level: identity_get_trust_level,
};

impl ComWrapper {
    /// Bring `payload` across the boundary, returning its native identity
    /// pointer with one reference owned by the caller. A second wrap of the
    /// same object revives the existing wrapper instead of minting a new
    /// identity.
    pub fn wrap(payload: &ManagedRef) -> *mut NativeHeader {
        let key = managed_key(payload);
        match LIVE_WRAPPERS.entry(key) {
            Entry::Occupied(e) => {
                let w = e.get().0;
                // The entry lock serializes this against the zero-count
                // removal path, so reviving a wrapper whose count just hit
                // zero is well-defined.
                unsafe { (*w).head.refs.fetch_add(1, Ordering::Relaxed) };
                unsafe { (*w).head.header_ptr() }
            }
            Entry::Vacant(e) => {
                let w = Self::alloc(payload.clone());
                e.insert(WrapperPtr(w));
                tracing::trace!(class = ?payload.class_name(), "created wrapper");
                unsafe { (*w).head.header_ptr() }
            }
        }
    }

    /// [`ComWrapper::wrap`], returning an owning handle.
    pub fn wrap_ref(payload: &ManagedRef) -> ComRef {
        let ptr = Self::wrap(payload);
        unsafe { ComRef::from_raw(ptr) }.expect("wrap never returns null")
    }

    fn alloc(payload: ManagedRef) -> *mut ComWrapper {
        let raw = Box::into_raw(Box::new(ComWrapper {
            head: WrapperHead::new(
                &IDENTITY_VTABLE as *const InspectableVtbl as *const c_void,
                WrapperKind::Identity,
            ),
            inner: OnceCell::new(),
            payload,
        }));
        unsafe { (*raw).head.header.backref = raw as *const c_void };
        raw
    }

    /// Recover the managed payload behind a pointer this bridge produced.
    /// Returns `None` for null, foreign pointers, and bridge wrappers that
    /// carry no payload (weak references).
    pub fn try_unwrap(ptr: *mut NativeHeader) -> Option<ManagedRef> {
        match probe_marker(ptr) {
            Probe::Payload(found) => Some(found),
            Probe::NoPayload | Probe::NotOurs => None,
        }
    }

    /// Full recovery: marker probe first, then the foreign path through
    /// `from_native`, de-duplicated per canonical native identity so
    /// concurrent first-touch never yields two managed identities for one
    /// native one. Null is "no object", not an error.
    pub fn unwrap(
        ptr: *mut NativeHeader,
        from_native: ClassFactory,
    ) -> Result<Option<ManagedRef>, BridgeError> {
        if ptr.is_null() {
            return Ok(None);
        }
        match probe_marker(ptr) {
            Probe::Payload(found) => return Ok(Some(found)),
            // Bridge-produced but payload-free; the from-native path must
            // never run for pointers this bridge minted.
            Probe::NoPayload => return Ok(None),
            Probe::NotOurs => {}
        }

        let handle =
            unsafe { ComRef::from_raw_add_ref(ptr) }.ok_or(BridgeError::NullArgument)?;
        let identity = handle.query(&IID_UNKNOWN)?;
        let key = identity.as_ptr() as usize;

        if let Some(existing) = NATIVE_PROXIES.get(&key) {
            if let Some(live) = existing.upgrade() {
                return Ok(Some(live));
            }
        }

        // Construct outside any map lock; `from_native` is arbitrary managed
        // logic and may itself unwrap other pointers.
        let proxy = from_native(identity)?;
        match NATIVE_PROXIES.entry(key) {
            Entry::Occupied(mut e) => match e.get().upgrade() {
                // Lost the first-touch race; the winner is the identity.
                Some(winner) => Ok(Some(winner)),
                None => {
                    e.insert(Arc::downgrade(&proxy));
                    Ok(Some(proxy))
                }
            },
            Entry::Vacant(e) => {
                e.insert(Arc::downgrade(&proxy));
                Ok(Some(proxy))
            }
        }
    }

    pub(crate) fn payload(&self) -> &ManagedRef {
        &self.payload
    }

    pub(crate) fn header_ptr(&self) -> *mut NativeHeader {
        self.head.header_ptr()
    }

    pub(crate) fn add_ref(&self) -> usize {
        self.head.refs.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Store the owned handle to a composed base's non-delegating inner.
    pub(crate) fn attach_inner(&self, inner: ComRef) -> bool {
        self.inner.set(inner).is_ok()
    }

    /// Decrement the native count; at zero, unpublish the wrapper and free
    /// it, releasing the inner and then the managed retain.
    ///
    /// # Safety
    /// `me` must point at a live wrapper and the caller must own one
    /// outstanding reference.
    unsafe fn release_ptr(me: *mut ComWrapper) -> usize {
        let prev = unsafe { (*me).head.refs.fetch_sub(1, Ordering::Release) };
        debug_assert!(prev != 0, "release on a dead wrapper");
        if prev != 1 {
            return prev - 1;
        }
        fence(Ordering::Acquire);
        let key = managed_key(unsafe { &(*me).payload });
        // The pointer comparison must run first: if another thread already
        // tore this wrapper down and a new one took the slot, `me` is gone
        // and must not be dereferenced.
        let removed = LIVE_WRAPPERS.remove_if(&key, |_, v| {
            v.0 == me && unsafe { (*me).head.refs.load(Ordering::Acquire) } == 0
        });
        if removed.is_some() {
            tracing::trace!(wrapper = ?me, "destroying wrapper");
            drop(unsafe { Box::from_raw(me) });
        }
        0
    }
}

/// Outcome of the marker-identifier probe.
enum Probe {
    /// The pointer was not produced by this bridge.
    NotOurs,
    /// One of ours, backed by a managed payload.
    Payload(ManagedRef),
    /// One of ours, but carrying no managed payload (a weak wrapper).
    NoPayload,
}

fn probe_marker(ptr: *mut NativeHeader) -> Probe {
    if ptr.is_null() {
        return Probe::NotOurs;
    }
    let mut out: *mut c_void = std::ptr::null_mut();
    let hr = unsafe { query_raw(ptr, &IID_BRIDGE_IDENTITY, &mut out) };
    if hr != S_OK || out.is_null() {
        return Probe::NotOurs;
    }
    let header = out as *mut NativeHeader;
    let head = unsafe { head_from(header) };
    let probe = match head.kind {
        WrapperKind::Identity => {
            let w = unsafe { &*(head as *const WrapperHead as *const ComWrapper) };
            Probe::Payload(w.payload.clone())
        }
        _ => Probe::NoPayload,
    };
    unsafe { release_raw(header) };
    probe
}

/// # Safety
/// `this` must be the embedded header of a live identity wrapper.
pub(crate) unsafe fn wrapper_from<'a>(this: *mut NativeHeader) -> &'a ComWrapper {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::Identity);
    unsafe { &*(head as *const WrapperHead as *const ComWrapper) }
}

unsafe extern "system" fn identity_query_interface(
    this: *mut NativeHeader,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    let wrapper = unsafe { wrapper_from(this) };
    guard_shim(|| dispatch::query_identity(wrapper, iid, out))
}

unsafe extern "system" fn identity_add_ref(this: *mut NativeHeader) -> u32 {
    unsafe { wrapper_from(this) }.add_ref() as u32
}

unsafe extern "system" fn identity_release(this: *mut NativeHeader) -> u32 {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::Identity);
    let me = head as *const WrapperHead as *mut ComWrapper;
    unsafe { ComWrapper::release_ptr(me) as u32 }
}

unsafe extern "system" fn identity_get_iids(
    _this: *mut NativeHeader,
    count: *mut u32,
    iids: *mut *mut Iid,
) -> HResult {
    if count.is_null() || iids.is_null() {
        return E_POINTER;
    }
    // The capability set is reported empty rather than allocated with a
    // platform allocator this crate does not model.
    unsafe {
        count.write(0);
        iids.write(std::ptr::null_mut());
    }
    S_OK
}

unsafe extern "system" fn identity_get_class_name(
    this: *mut NativeHeader,
    out: *mut *const c_char,
) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    let wrapper = unsafe { wrapper_from(this) };
    guard_shim(|| {
        unsafe { out.write(wrapper.payload.class_name().as_ptr()) };
        S_OK
    })
}

unsafe extern "system" fn identity_get_trust_level(
    _this: *mut NativeHeader,
    out: *mut TrustLevel,
) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe { out.write(TrustLevel::Base) };
    S_OK
}

/// A secondary wrapper materialized for one capability hit. It shares the
/// identity wrapper's lifetime (it holds a strong handle to it) but counts
/// its own references; universal queries resolve through the identity, so
/// identity equality is preserved across every interface of the object.
#[repr(C)]
pub(crate) struct TearOff {
    head: WrapperHead,
    iid: Iid,
    identity: ComRef,
    payload: ManagedRef,
}

const _: () = assert!(std::mem::offset_of!(TearOff, head) == 0);

impl TearOff {
    pub(crate) fn create(
        vtable: RawVtable,
        iid: Iid,
        identity: ComRef,
        payload: ManagedRef,
    ) -> *mut NativeHeader {
        let raw = Box::into_raw(Box::new(TearOff {
            head: WrapperHead::new(vtable.0, WrapperKind::TearOff),
            iid,
            identity,
            payload,
        }));
        unsafe {
            (*raw).head.header.backref = raw as *const c_void;
            (*raw).head.header_ptr()
        }
    }
}

/// # Safety
/// `this` must be the embedded header of a live tear-off.
unsafe fn tear_off_from<'a>(this: *mut NativeHeader) -> &'a TearOff {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::TearOff);
    unsafe { &*(head as *const WrapperHead as *const TearOff) }
}

/// Recover the managed payload behind a tear-off pointer, for use inside
/// contract method implementations.
///
/// # Safety
/// `this` must be an interface pointer produced by a capability hit on this
/// bridge (the `this` argument of a contract vtable method).
pub unsafe fn tear_off_payload<'a>(this: *mut NativeHeader) -> &'a ManagedRef {
    unsafe { &tear_off_from(this).payload }
}

pub unsafe extern "system" fn tear_off_query_interface(
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
        let tear_off = unsafe { tear_off_from(this) };
        if requested == tear_off.iid && !is_universal(&requested) {
            tear_off.head.refs.fetch_add(1, Ordering::Relaxed);
            unsafe { out.write(this as *mut c_void) };
            return S_OK;
        }
        // Universal identifiers and every other capability resolve through
        // the identity wrapper, preserving the pointer-equality rule.
        tear_off.identity.query_raw(&requested, out)
    })
}

pub unsafe extern "system" fn tear_off_add_ref(this: *mut NativeHeader) -> u32 {
    let tear_off = unsafe { tear_off_from(this) };
    (tear_off.head.refs.fetch_add(1, Ordering::Relaxed) + 1) as u32
}

pub unsafe extern "system" fn tear_off_release(this: *mut NativeHeader) -> u32 {
    let head = unsafe { head_from(this) };
    debug_assert_eq!(head.kind, WrapperKind::TearOff);
    let me = head as *const WrapperHead as *mut TearOff;
    let prev = unsafe { (*me).head.refs.fetch_sub(1, Ordering::Release) };
    debug_assert!(prev != 0, "release on a dead tear-off");
    if prev != 1 {
        return (prev - 1) as u32;
    }
    fence(Ordering::Acquire);
    drop(unsafe { Box::from_raw(me) });
    0
}

/// The base-protocol header every contract vtable embeds as its first field.
pub const TEAR_OFF_BASE: UnknownVtbl = UnknownVtbl {
    query_interface: tear_off_query_interface,
    add_ref: tear_off_add_ref,
    release: tear_off_release,
};
