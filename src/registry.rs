//! Runtime class registry.
//!
//! Maps runtime class names to managed factories, populated explicitly at
//! process start. Aggregation identity recovery consults it when a foreign
//! base pointer must be given a managed face of the most-derived known type;
//! an unregistered name is an explicit, observable outcome, not a silent
//! fallback.
use crate::error::BridgeError;
use crate::handle::ComRef;
use crate::object::ManagedRef;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::ffi::CStr;

/// Constructs a managed value around a native pointer the bridge did not
/// produce. One per registered class; also the shape of a bridge contract's
/// from-native constructor.
pub type ClassFactory = fn(ComRef) -> Result<ManagedRef, BridgeError>;

static CLASSES: Lazy<DashMap<&'static CStr, ClassFactory>> = Lazy::new(DashMap::new);

/// Register a factory for `name`. Returns `false` if the name was already
/// registered (the previous factory is kept).
pub fn register_class(name: &'static CStr, factory: ClassFactory) -> bool {
    match CLASSES.entry(name) {
        dashmap::mapref::entry::Entry::Occupied(_) => false,
        dashmap::mapref::entry::Entry::Vacant(e) => {
            e.insert(factory);
            true
        }
    }
}

pub fn lookup(name: &CStr) -> Option<ClassFactory> {
    CLASSES.get(name).map(|f| *f)
}
