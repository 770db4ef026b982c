use crate::abi::{succeeded, HResult, E_FAIL, E_NOINTERFACE, E_POINTER, S_OK};
use crate::iid::Iid;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BridgeError {
    #[error("interface {0} is not supported")]
    InterfaceNotSupported(Iid),

    #[error("required argument was null")]
    NullArgument,

    #[error("runtime class '{0}' is not registered")]
    ClassNotRegistered(String),

    #[error("type does not participate in aggregation")]
    NotComposable,

    #[error("object is already composed with a native base")]
    AlreadyComposed,

    #[error("platform marshaler is unavailable: {0}")]
    MarshalerUnavailable(String),

    #[error("forwarded call failed with {0:#010x}")]
    Forwarded(HResult),
}

impl BridgeError {
    /// Map to a platform status code. Only three codes originate in this
    /// crate; forwarded codes pass through unmodified, and anything that
    /// should never cross the boundary collapses to the generic failure.
    pub fn to_hresult(&self) -> HResult {
        match self {
            BridgeError::InterfaceNotSupported(_) => E_NOINTERFACE,
            BridgeError::NullArgument => E_POINTER,
            BridgeError::Forwarded(hr) => *hr,
            _ => E_FAIL,
        }
    }
}

/// Convert a fallible bridge outcome into a status code.
pub fn hresult_from(result: Result<(), BridgeError>) -> HResult {
    match result {
        Ok(()) => S_OK,
        Err(e) => e.to_hresult(),
    }
}

/// Lift a forwarded status code back into a result.
pub fn check(hr: HResult) -> Result<(), BridgeError> {
    if succeeded(hr) {
        Ok(())
    } else {
        Err(BridgeError::Forwarded(hr))
    }
}
