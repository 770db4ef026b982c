//! Platform services.
//!
//! The one platform primitive this subsystem consumes directly is the
//! free-threaded-marshaler creation routine. By default it is resolved from
//! the platform's runtime library at first use; bootstrap (or a test
//! harness) may install a different acquisition routine before that.
use crate::abi::{succeeded, HResult, NativeHeader};
use crate::error::BridgeError;
use crate::handle::ComRef;
use libloading::Library;
use once_cell::sync::OnceCell;
use std::ffi::c_void;

/// Produces a platform free-threaded marshaler, one per call.
pub type MarshalerFactory = fn() -> Result<ComRef, BridgeError>;

static FACTORY: OnceCell<MarshalerFactory> = OnceCell::new();

/// Install the marshaler acquisition routine. Returns `false` if one is
/// already installed (including the platform default, once used).
pub fn install_marshaler_factory(factory: MarshalerFactory) -> bool {
    FACTORY.set(factory).is_ok()
}

pub(crate) fn create_free_threaded_marshaler() -> Result<ComRef, BridgeError> {
    let factory = FACTORY.get_or_init(|| platform_default);
    factory()
}

type CreateMarshalerFn = unsafe extern "system" fn(*mut c_void, *mut *mut c_void) -> HResult;

/// Candidate libraries exporting the creation routine, most specific first.
const CANDIDATES: &[&str] = &["combase.dll", "ole32.dll"];
const EXPORT_NAME: &[u8] = b"CoCreateFreeThreadedMarshaler\0";

static EXPORT: OnceCell<Result<CreateMarshalerFn, String>> = OnceCell::new();

fn platform_default() -> Result<ComRef, BridgeError> {
    let create = EXPORT
        .get_or_init(resolve_export)
        .clone()
        .map_err(BridgeError::MarshalerUnavailable)?;

    let mut out: *mut c_void = std::ptr::null_mut();
    let hr = unsafe { create(std::ptr::null_mut(), &mut out) };
    if !succeeded(hr) {
        return Err(BridgeError::MarshalerUnavailable(format!(
            "creation export failed with {hr:#010x}"
        )));
    }
    unsafe { ComRef::from_raw(out as *mut NativeHeader) }
        .ok_or_else(|| BridgeError::MarshalerUnavailable("creation export returned null".into()))
}

fn resolve_export() -> Result<CreateMarshalerFn, String> {
    let mut last = String::from("no candidate library found");
    for name in CANDIDATES {
        match unsafe { Library::new(name) } {
            Ok(lib) => match unsafe { lib.get::<CreateMarshalerFn>(EXPORT_NAME) } {
                Ok(sym) => {
                    let create = *sym;
                    drop(sym);
                    // The library must stay loaded for the process lifetime;
                    // the export is cached globally.
                    std::mem::forget(lib);
                    return Ok(create);
                }
                Err(e) => last = format!("'{name}' has no marshaler export: {e}"),
            },
            Err(e) => last = format!("failed to load '{name}': {e}"),
        }
    }
    Err(last)
}
