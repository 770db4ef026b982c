//! Composition of managed subtypes over sealed native bases.
//!
//! A composable base is constructed through a factory that takes an optional
//! controlling outer. Unaggregated construction passes no outer and the
//! factory's single pointer is both the object's identity and its inner.
//! Aggregated construction passes the managed wrapper's header as the outer;
//! the factory returns the base's non-delegating inner, which from then on
//! is only a private implementation detail: all externally visible
//! reference counting and negotiation lands on the outer.
//!
//! Bookkeeping uses the weak-back-pointer scheme: the wrapper owns the inner
//! strongly and releases it strictly before the managed retain; the base
//! knows the outer only as the raw, non-owning pointer it received at
//! construction, so no retain cycle can form.
use crate::abi::{succeeded, InspectableVtbl, NativeHeader};
use crate::error::BridgeError;
use crate::handle::ComRef;
use crate::iid::IID_INSPECTABLE;
use crate::object::{InnerView, ManagedRef};
use crate::registry::{self, ClassFactory};
use crate::wrapper::{wrapper_from, ComWrapper};
use std::ffi::{c_char, CStr, CString};
use std::ptr::NonNull;

/// Construct an unaggregated instance: the managed type is the most-derived
/// shape, so the factory's pointer is used directly, with no forwarding.
pub fn activate<F>(factory: F) -> Result<ComRef, BridgeError>
where
    F: FnOnce(Option<NonNull<NativeHeader>>) -> Result<ComRef, BridgeError>,
{
    factory(None)
}

/// Construct an aggregated instance: `payload` overrides a composable base
/// produced by `factory`.
///
/// The wrapper is created first so the outer's capability table is fully
/// answerable before the factory runs; a base querying its outer during its
/// own construction is defined behavior. Queries that would forward to the
/// inner during that window fail with "interface not supported" because the
/// inner does not exist yet.
pub fn compose<F>(payload: ManagedRef, factory: F) -> Result<ComRef, BridgeError>
where
    F: FnOnce(Option<NonNull<NativeHeader>>) -> Result<ComRef, BridgeError>,
{
    let aggregation = payload.aggregation().ok_or(BridgeError::NotComposable)?;

    let outer = ComWrapper::wrap_ref(&payload);
    let outer_header = NonNull::new(outer.as_ptr()).ok_or(BridgeError::NullArgument)?;

    let inner = factory(Some(outer_header))?;
    let view = InnerView(NonNull::new(inner.as_ptr()).ok_or(BridgeError::NullArgument)?);
    if !aggregation.attach_inner(view) {
        return Err(BridgeError::AlreadyComposed);
    }
    let attached = unsafe { wrapper_from(outer.as_ptr()) }.attach_inner(inner);
    debug_assert!(attached, "wrapper inner attached twice");

    Ok(outer)
}

/// Recover the managed identity behind a base-typed native pointer, e.g. one
/// delivered by a platform callback.
///
/// If the pointer resolves to a wrapper this bridge produced, an app-provided
/// override exists and its managed identity is returned. Otherwise the base
/// is given a managed face of the most-derived registered class, looked up by
/// its reported runtime class name, falling back to the caller's `declared`
/// static type when the name is unknown. Recovery is canonicalized per
/// native identity, so concurrent recovery of the same base yields one
/// managed identity.
pub fn recover(base: &ComRef, declared: ClassFactory) -> Result<ManagedRef, BridgeError> {
    if let Some(found) = ComWrapper::try_unwrap(base.as_ptr()) {
        return Ok(found);
    }

    let factory = match runtime_class_name(base) {
        Some(name) => match registry::lookup(&name) {
            Some(f) => f,
            None => {
                tracing::warn!(
                    class = %name.to_string_lossy(),
                    "runtime class not registered, using declared type"
                );
                declared
            }
        },
        None => declared,
    };

    ComWrapper::unwrap(base.as_ptr(), factory)?.ok_or(BridgeError::NullArgument)
}

/// Ask a native object for its runtime class name through the introspection
/// interface. Objects that do not expose it simply have no name.
fn runtime_class_name(base: &ComRef) -> Option<CString> {
    let inspectable = base.query(&IID_INSPECTABLE).ok()?;
    let vtbl = unsafe { (*inspectable.as_ptr()).vtable as *const InspectableVtbl };
    let mut name: *const c_char = std::ptr::null();
    let hr =
        unsafe { ((*vtbl).get_runtime_class_name)(inspectable.as_ptr(), &mut name) };
    if !succeeded(hr) || name.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(name) }.to_owned())
}
