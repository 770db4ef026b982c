//! # combridge
//!
//! Bridges a managed, retain-counted object model to a native,
//! binary-interface-based one: objects cross the boundary as interface
//! pointers whose vtables begin with the fixed query/add-ref/release header,
//! and the same logical object always unwraps to the same identity on both
//! sides.
//!
//! ## Subsystems
//!
//! - **ABI** (`abi`, `iid`): the fixed dispatch-table layouts, status codes,
//!   and 128-bit interface identifiers.
//! - **Wrapper** (`wrapper`, `dispatch`): pairs a managed payload with a
//!   native header, bridges the two reference-count models, and negotiates
//!   interfaces.
//! - **Aggregation** (`aggregate`, `registry`): composition of managed
//!   subtypes over sealed native bases, with identity recovery through the
//!   runtime class registry.
//! - **Weak references** (`weak`): observing managed lifetime without
//!   extending it.
//! - **Marshaling** (`marshal`, `platform`): adapting references for
//!   cross-apartment use via the platform's free-threaded marshaler.
//! - **Events** (`events`): snapshot-on-raise handler lists.

pub mod abi;
pub mod aggregate;
mod dispatch;
pub mod error;
pub mod events;
pub mod handle;
pub mod iid;
pub mod marshal;
pub mod object;
pub mod platform;
pub mod registry;
pub mod weak;
pub mod wrapper;

pub use error::BridgeError;
pub use handle::ComRef;
pub use iid::Iid;
pub use object::{
    Aggregation, CapabilityTable, InterfaceContract, ManagedRef, RuntimeObject,
};
pub use wrapper::{tear_off_payload, ComWrapper, TEAR_OFF_BASE};
