//! Shared fixtures: managed test types on one side of the bridge, and
//! hand-rolled native objects (which the bridge did not produce) on the
//! other.
#![allow(dead_code)]

use combridge::abi::{
    HResult, InspectableVtbl, NativeHeader, TrustLevel, UnknownVtbl, E_FAIL, E_NOINTERFACE,
    E_POINTER, S_OK,
};
use combridge::iid::{Iid, IID_INSPECTABLE, IID_UNKNOWN};
use combridge::{
    tear_off_payload, Aggregation, BridgeError, CapabilityTable, ComRef, InterfaceContract,
    ManagedRef, RuntimeObject, TEAR_OFF_BASE,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::ffi::{c_char, c_void, CStr};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const IID_VALUE: Iid = Iid::new(0x51D0_0001, 0x4AA2, 0x4F11, [0x8E, 0x10, 0, 0, 0, 0, 0, 1]);
pub const IID_BASE_FEATURE: Iid =
    Iid::new(0x51D0_0002, 0x4AA2, 0x4F11, [0x8E, 0x10, 0, 0, 0, 0, 0, 2]);
pub const IID_DERIVED_FEATURE: Iid =
    Iid::new(0x51D0_0003, 0x4AA2, 0x4F11, [0x8E, 0x10, 0, 0, 0, 0, 0, 3]);
pub const IID_NOT_IMPLEMENTED: Iid =
    Iid::new(0x51D0_00FF, 0x4AA2, 0x4F11, [0x8E, 0x10, 0, 0, 0, 0, 0, 0xFF]);

/// Value returned by the native base's `describe` method.
pub const BASE_DESCRIBE_RESULT: i32 = 7;

#[repr(C)]
pub struct ValueVtbl {
    pub base: UnknownVtbl,
    pub get_value: unsafe extern "system" fn(*mut NativeHeader, *mut i32) -> HResult,
}

/// Managed type advertising one extra capability.
pub struct Widget {
    pub value: i32,
    drops: Option<Arc<AtomicUsize>>,
}

impl Widget {
    pub fn new(value: i32) -> ManagedRef {
        Arc::new(Widget { value, drops: None })
    }

    pub fn counted(value: i32, drops: Arc<AtomicUsize>) -> ManagedRef {
        Arc::new(Widget {
            value,
            drops: Some(drops),
        })
    }
}

impl Drop for Widget {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

static WIDGET_CAPS: Lazy<CapabilityTable> =
    Lazy::new(|| CapabilityTable::new().with::<WidgetValue>());

impl RuntimeObject for Widget {
    fn class_name(&self) -> &'static CStr {
        c"Tests.Widget"
    }
    fn capabilities(&self) -> Option<&CapabilityTable> {
        Some(&WIDGET_CAPS)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct WidgetValue;

unsafe impl InterfaceContract for WidgetValue {
    type Vtable = ValueVtbl;
    const IID: Iid = IID_VALUE;
    fn vtable() -> &'static ValueVtbl {
        static VTBL: ValueVtbl = ValueVtbl {
            base: TEAR_OFF_BASE,
            get_value: widget_get_value,
        };
        &VTBL
    }
}

unsafe extern "system" fn widget_get_value(this: *mut NativeHeader, out: *mut i32) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    let payload = unsafe { tear_off_payload(this) };
    match payload.as_any().downcast_ref::<Widget>() {
        Some(widget) => {
            unsafe { out.write(widget.value) };
            S_OK
        }
        None => E_FAIL,
    }
}

/// Managed subtype composing the sealed native base, overriding the derived
/// feature but not the base one.
pub struct Derived {
    pub value: i32,
    aggregation: Aggregation,
    log: Option<Arc<Mutex<Vec<&'static str>>>>,
}

impl Derived {
    pub fn new(value: i32) -> ManagedRef {
        Arc::new(Derived {
            value,
            aggregation: Aggregation::new(),
            log: None,
        })
    }

    pub fn logged(value: i32, log: Arc<Mutex<Vec<&'static str>>>) -> ManagedRef {
        Arc::new(Derived {
            value,
            aggregation: Aggregation::new(),
            log: Some(log),
        })
    }
}

impl Drop for Derived {
    fn drop(&mut self) {
        if let Some(log) = &self.log {
            log.lock().push("payload");
        }
    }
}

static DERIVED_CAPS: Lazy<CapabilityTable> =
    Lazy::new(|| CapabilityTable::new().with::<DerivedFeature>());

impl RuntimeObject for Derived {
    fn class_name(&self) -> &'static CStr {
        c"Tests.Derived"
    }
    fn capabilities(&self) -> Option<&CapabilityTable> {
        Some(&DERIVED_CAPS)
    }
    fn aggregation(&self) -> Option<&Aggregation> {
        Some(&self.aggregation)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct DerivedFeature;

unsafe impl InterfaceContract for DerivedFeature {
    type Vtable = ValueVtbl;
    const IID: Iid = IID_DERIVED_FEATURE;
    fn vtable() -> &'static ValueVtbl {
        static VTBL: ValueVtbl = ValueVtbl {
            base: TEAR_OFF_BASE,
            get_value: derived_get_value,
        };
        &VTBL
    }
}

unsafe extern "system" fn derived_get_value(this: *mut NativeHeader, out: *mut i32) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    let payload = unsafe { tear_off_payload(this) };
    match payload.as_any().downcast_ref::<Derived>() {
        Some(derived) => {
            unsafe { out.write(derived.value) };
            S_OK
        }
        None => E_FAIL,
    }
}

/// Managed subtype that composes the base without overriding anything; the
/// wrapper exists purely for lifetime bridging.
pub struct NoOverride {
    aggregation: Aggregation,
}

impl NoOverride {
    pub fn new() -> ManagedRef {
        Arc::new(NoOverride {
            aggregation: Aggregation::new(),
        })
    }
}

impl RuntimeObject for NoOverride {
    fn class_name(&self) -> &'static CStr {
        c"Tests.NoOverride"
    }
    fn aggregation(&self) -> Option<&Aggregation> {
        Some(&self.aggregation)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hand-rolled native object: base protocol plus introspection, produced
/// outside the bridge. Never answers the bridge's marker identifier.
#[repr(C)]
pub struct ForeignObject {
    header: NativeHeader,
    refs: AtomicUsize,
    class_name: &'static CStr,
}

static FOREIGN_VTABLE: InspectableVtbl = InspectableVtbl {
    base: UnknownVtbl {
        query_interface: foreign_query_interface,
        add_ref: foreign_add_ref,
        release: foreign_release,
    },
    get_iids: foreign_get_iids,
    get_runtime_class_name: foreign_get_class_name,
    get_trust_level: foreign_get_trust_level,
};

impl ForeignObject {
    pub fn create(class_name: &'static CStr) -> ComRef {
        let raw = Box::into_raw(Box::new(ForeignObject {
            header: NativeHeader::new(&FOREIGN_VTABLE as *const InspectableVtbl as *const c_void),
            refs: AtomicUsize::new(1),
            class_name,
        }));
        unsafe { ComRef::from_raw(raw as *mut NativeHeader) }.unwrap()
    }
}

unsafe fn foreign_from<'a>(this: *mut NativeHeader) -> &'a ForeignObject {
    unsafe { &*(this as *const ForeignObject) }
}

unsafe extern "system" fn foreign_query_interface(
    this: *mut NativeHeader,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    if iid.is_null() || out.is_null() {
        return E_POINTER;
    }
    let requested = unsafe { *iid };
    unsafe { out.write(std::ptr::null_mut()) };
    if requested == IID_UNKNOWN || requested == IID_INSPECTABLE {
        unsafe { foreign_from(this) }.refs.fetch_add(1, Ordering::Relaxed);
        unsafe { out.write(this as *mut c_void) };
        S_OK
    } else {
        E_NOINTERFACE
    }
}

unsafe extern "system" fn foreign_add_ref(this: *mut NativeHeader) -> u32 {
    (unsafe { foreign_from(this) }.refs.fetch_add(1, Ordering::Relaxed) + 1) as u32
}

unsafe extern "system" fn foreign_release(this: *mut NativeHeader) -> u32 {
    let me = this as *mut ForeignObject;
    let prev = unsafe { (*me).refs.fetch_sub(1, Ordering::Release) };
    if prev == 1 {
        std::sync::atomic::fence(Ordering::Acquire);
        drop(unsafe { Box::from_raw(me) });
        0
    } else {
        (prev - 1) as u32
    }
}

unsafe extern "system" fn foreign_get_iids(
    _this: *mut NativeHeader,
    count: *mut u32,
    iids: *mut *mut Iid,
) -> HResult {
    unsafe {
        count.write(0);
        iids.write(std::ptr::null_mut());
    }
    S_OK
}

unsafe extern "system" fn foreign_get_class_name(
    this: *mut NativeHeader,
    out: *mut *const c_char,
) -> HResult {
    unsafe { out.write(foreign_from(this).class_name.as_ptr()) };
    S_OK
}

unsafe extern "system" fn foreign_get_trust_level(
    _this: *mut NativeHeader,
    out: *mut TrustLevel,
) -> HResult {
    unsafe { out.write(TrustLevel::Base) };
    S_OK
}

/// Hand-rolled sealed native base for composition: base protocol,
/// introspection, and one feature of its own. Constructed through
/// [`base_factory`], optionally under a controlling outer.
#[repr(C)]
pub struct NativeBase {
    header: NativeHeader,
    refs: AtomicUsize,
    outer: Option<NonNull<NativeHeader>>,
    class_name: &'static CStr,
    log: Option<Arc<Mutex<Vec<&'static str>>>>,
}

#[repr(C)]
pub struct BaseVtbl {
    pub base: InspectableVtbl,
    pub describe: unsafe extern "system" fn(*mut NativeHeader, *mut i32) -> HResult,
}

static BASE_VTABLE: BaseVtbl = BaseVtbl {
    base: InspectableVtbl {
        base: UnknownVtbl {
            query_interface: base_query_interface,
            add_ref: base_add_ref,
            release: base_release,
        },
        get_iids: foreign_get_iids,
        get_runtime_class_name: base_get_class_name,
        get_trust_level: foreign_get_trust_level,
    },
    describe: base_describe,
};

/// Build a base construction routine reporting `class_name`, recording
/// teardown into `log` when given.
pub fn base_factory(
    class_name: &'static CStr,
    log: Option<Arc<Mutex<Vec<&'static str>>>>,
) -> impl FnOnce(Option<NonNull<NativeHeader>>) -> Result<ComRef, BridgeError> {
    move |outer| {
        let raw = Box::into_raw(Box::new(NativeBase {
            header: NativeHeader::new(&BASE_VTABLE as *const BaseVtbl as *const c_void),
            refs: AtomicUsize::new(1),
            outer,
            class_name,
            log,
        }));
        Ok(unsafe { ComRef::from_raw(raw as *mut NativeHeader) }.unwrap())
    }
}

unsafe fn base_from<'a>(this: *mut NativeHeader) -> &'a NativeBase {
    unsafe { &*(this as *const NativeBase) }
}

// The non-delegating table: answers for itself, regardless of any outer.
unsafe extern "system" fn base_query_interface(
    this: *mut NativeHeader,
    iid: *const Iid,
    out: *mut *mut c_void,
) -> HResult {
    if iid.is_null() || out.is_null() {
        return E_POINTER;
    }
    let requested = unsafe { *iid };
    unsafe { out.write(std::ptr::null_mut()) };
    if requested == IID_UNKNOWN || requested == IID_INSPECTABLE || requested == IID_BASE_FEATURE {
        unsafe { base_from(this) }.refs.fetch_add(1, Ordering::Relaxed);
        unsafe { out.write(this as *mut c_void) };
        S_OK
    } else {
        E_NOINTERFACE
    }
}

unsafe extern "system" fn base_add_ref(this: *mut NativeHeader) -> u32 {
    (unsafe { base_from(this) }.refs.fetch_add(1, Ordering::Relaxed) + 1) as u32
}

unsafe extern "system" fn base_release(this: *mut NativeHeader) -> u32 {
    let me = this as *mut NativeBase;
    let prev = unsafe { (*me).refs.fetch_sub(1, Ordering::Release) };
    if prev == 1 {
        std::sync::atomic::fence(Ordering::Acquire);
        if let Some(log) = unsafe { &(*me).log } {
            log.lock().push("inner");
        }
        drop(unsafe { Box::from_raw(me) });
        0
    } else {
        (prev - 1) as u32
    }
}

unsafe extern "system" fn base_get_class_name(
    this: *mut NativeHeader,
    out: *mut *const c_char,
) -> HResult {
    unsafe { out.write(base_from(this).class_name.as_ptr()) };
    S_OK
}

unsafe extern "system" fn base_describe(_this: *mut NativeHeader, out: *mut i32) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    unsafe { out.write(BASE_DESCRIBE_RESULT) };
    S_OK
}

/// Managed proxy produced for foreign pointers (the from-native direction).
pub struct ForeignProxy {
    pub handle: ComRef,
    class_name: &'static CStr,
}

impl RuntimeObject for ForeignProxy {
    fn class_name(&self) -> &'static CStr {
        self.class_name
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn registered_proxy_factory(handle: ComRef) -> Result<ManagedRef, BridgeError> {
    Ok(Arc::new(ForeignProxy {
        handle,
        class_name: c"Tests.RegisteredProxy",
    }))
}

pub fn declared_proxy_factory(handle: ComRef) -> Result<ManagedRef, BridgeError> {
    Ok(Arc::new(ForeignProxy {
        handle,
        class_name: c"Tests.DeclaredProxy",
    }))
}

/// Call `get_value` through a value-shaped interface pointer.
pub fn call_get_value(ptr: *mut NativeHeader) -> (HResult, i32) {
    let vtbl = unsafe { *(ptr as *const *const ValueVtbl) };
    let mut value = 0;
    let hr = unsafe { ((*vtbl).get_value)(ptr, &mut value) };
    (hr, value)
}

/// Call `describe` through a base-shaped interface pointer.
pub fn call_describe(ptr: *mut NativeHeader) -> (HResult, i32) {
    let vtbl = unsafe { *(ptr as *const *const BaseVtbl) };
    let mut value = 0;
    let hr = unsafe { ((*vtbl).describe)(ptr, &mut value) };
    (hr, value)
}
