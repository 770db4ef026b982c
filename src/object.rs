//! Contracts the managed-object layer implements to participate in bridging.
//!
//! A managed type crosses into the native world by implementing
//! [`RuntimeObject`]; each additional interface it advertises is declared
//! once through an [`InterfaceContract`] and registered in the type's
//! [`CapabilityTable`]. Types extending a sealed native base additionally
//! carry an [`Aggregation`] slot.
use crate::abi::NativeHeader;
use crate::iid::Iid;
use std::any::Any;
use std::ffi::{c_void, CStr};
use std::ptr::NonNull;
use std::sync::Arc;

/// A strong handle to a managed object. While any native reference to a
/// wrapper is outstanding, the wrapper holds one of these, so the managed
/// retain count is never below the native one.
pub type ManagedRef = Arc<dyn RuntimeObject>;

/// Key identifying a managed object by the address of its allocation.
pub(crate) fn managed_key(m: &ManagedRef) -> usize {
    Arc::as_ptr(m) as *const () as usize
}

/// The managed side of the bridge.
pub trait RuntimeObject: Send + Sync + 'static {
    /// Runtime class name, as reported through the introspection interface.
    fn class_name(&self) -> &'static CStr;

    /// The interfaces this type advertises beyond the universal set, built
    /// once per type. `None` means the type answers only universal queries.
    fn capabilities(&self) -> Option<&CapabilityTable> {
        None
    }

    /// Aggregation participation, for types composing a sealed native base.
    fn aggregation(&self) -> Option<&Aggregation> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// The compile-time pairing between one managed type and one native
/// interface shape.
///
/// # Safety
/// `Vtable` must be `#[repr(C)]` and begin with [`crate::abi::UnknownVtbl`]
/// whose three entries are the tear-off shims
/// ([`crate::wrapper::TEAR_OFF_BASE`]); the remaining entries must match the
/// interface's declared method order exactly. Violating either breaks the
/// binary contract for every caller of the interface.
pub unsafe trait InterfaceContract {
    type Vtable: Sync + 'static;
    const IID: Iid;
    fn vtable() -> &'static Self::Vtable;
}

/// Type-erased pointer to a `'static` dispatch table.
#[derive(Clone, Copy)]
pub struct RawVtable(pub(crate) *const c_void);

// Dispatch tables are immutable statics.
unsafe impl Send for RawVtable {}
unsafe impl Sync for RawVtable {}

/// Explicit mapping from interface identifier to dispatch table, built once
/// per managed type at registration time and consulted by the query
/// dispatcher. The table is small; lookup is a linear scan.
#[derive(Default)]
pub struct CapabilityTable {
    entries: Vec<(Iid, RawVtable)>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<C: InterfaceContract>(mut self) -> Self {
        self.entries
            .push((C::IID, RawVtable(C::vtable() as *const C::Vtable as *const c_void)));
        self
    }

    pub(crate) fn lookup(&self, iid: &Iid) -> Option<RawVtable> {
        self.entries
            .iter()
            .find(|(known, _)| known == iid)
            .map(|(_, vt)| *vt)
    }

    pub fn iids(&self) -> impl Iterator<Item = &Iid> {
        self.entries.iter().map(|(iid, _)| iid)
    }
}

/// Non-owning view of a composed base's non-delegating implementation.
///
/// The owning reference lives on the wrapper (released strictly before the
/// managed retain); this view exists only so the managed object can invoke
/// base behavior it does not override. It must never be handed out as the
/// object's identity.
#[derive(Clone, Copy)]
pub struct InnerView(pub(crate) NonNull<NativeHeader>);

unsafe impl Send for InnerView {}
unsafe impl Sync for InnerView {}

impl InnerView {
    pub fn as_ptr(&self) -> *mut NativeHeader {
        self.0.as_ptr()
    }
}

/// Aggregation participation state for a managed type composing a sealed
/// native base. The inner slot is written exactly once, during composed
/// construction, before the object becomes visible to other threads.
#[derive(Default)]
pub struct Aggregation {
    inner: once_cell::sync::OnceCell<InnerView>,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    /// The non-delegating inner pointer, if composed construction completed.
    pub fn inner(&self) -> Option<InnerView> {
        self.inner.get().copied()
    }

    pub(crate) fn attach_inner(&self, view: InnerView) -> bool {
        self.inner.set(view).is_ok()
    }
}
