//! Interface identifiers.
//!
//! Every capability a native-visible object can be asked for is keyed by a
//! 128-bit identifier with structural equality. A small fixed set of
//! *universal* identifiers is recognized by every wrapper regardless of its
//! payload type; everything else is negotiated per type.
use std::fmt::{self, Debug, Display, Formatter};

/// A 128-bit interface identifier, compared structurally.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Iid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }
}

impl Display for Iid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7],
        )
    }
}

impl Debug for Iid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Base reference-counting interface. Querying any interface pointer of an
/// object for this identifier must yield the same pointer every time; that
/// pointer *is* the object's native identity.
pub const IID_UNKNOWN: Iid = Iid::new(
    0x0000_0000,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// Base introspection interface (runtime class name, trust level).
pub const IID_INSPECTABLE: Iid = Iid::new(
    0xAF86_E2E0,
    0xB12D,
    0x4C6A,
    [0x9C, 0x5A, 0xD7, 0xAA, 0x65, 0x10, 0x1E, 0x90],
);

/// Marker answered only by wrappers this bridge produced. Probing for it is
/// how `unwrap` distinguishes bridge pointers from foreign ones without ever
/// reinterpreting foreign memory.
pub const IID_BRIDGE_IDENTITY: Iid = Iid::new(
    0x7C94_11A5,
    0x21E3,
    0x4E8F,
    [0xB2, 0x60, 0x4D, 0xE1, 0x88, 0x3A, 0x5C, 0x19],
);

/// Free-threaded marker: the object may be called from any apartment.
pub const IID_AGILE_OBJECT: Iid = Iid::new(
    0x94EA_2B94,
    0xE9CC,
    0x49E0,
    [0xC0, 0xFF, 0xEE, 0x64, 0xCA, 0x8F, 0x5B, 0x90],
);

/// Weak reference to an object, resolvable to a strong reference or null.
pub const IID_WEAK_REFERENCE: Iid = Iid::new(
    0x0000_0037,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// Source from which a weak reference can be obtained.
pub const IID_WEAK_REFERENCE_SOURCE: Iid = Iid::new(
    0x0000_0038,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// Cross-apartment marshaling protocol.
pub const IID_MARSHAL: Iid = Iid::new(
    0x0000_0003,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// Universal identifiers are answered uniformly by every wrapper, always by
/// the object's identity, even if a payload's capability table also claims
/// them. This guarantees the pointer-equality identity rule.
pub fn is_universal(iid: &Iid) -> bool {
    *iid == IID_UNKNOWN
        || *iid == IID_INSPECTABLE
        || *iid == IID_BRIDGE_IDENTITY
        || *iid == IID_AGILE_OBJECT
}
