//! Data types shared between the residue leak tracker and its front-ends.
//!
//! Everything in here is plain data: identity keys for host objects and
//! types, the records a tracer emits for live objects, and the
//! activity checkpoints it produces. All of it derives [`Facet`] so reports
//! can be serialized as-is.

use facet::Facet;
use std::error::Error;
use std::fmt;

mod report;

pub use report::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    ZeroId(&'static str),
    AddressOutOfRange { field: &'static str, got: usize },
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroId(field) => write!(f, "{field} must be non-zero"),
            Self::AddressOutOfRange { field, got } => {
                write!(f, "{field} must fit in 64 bits, got 0x{got:x}")
            }
        }
    }
}

impl Error for InvariantError {}

macro_rules! define_key {
    (
        $(#[$meta:meta])*
        $name:ident($repr:ty),
        field = $field:literal
    ) => {
        #[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[facet(transparent)]
        $(#[$meta])*
        pub struct $name($repr);

        impl $name {
            pub fn new(value: $repr) -> Result<Self, InvariantError> {
                if value == 0 {
                    return Err(InvariantError::ZeroId($field));
                }
                Ok(Self(value))
            }

            pub fn get(self) -> $repr {
                self.0
            }
        }
    };
}

define_key!(
    /// Identity of a host object for the duration of its lifetime.
    ///
    /// Derived from the object's address, so the same value may come back
    /// for an unrelated object once the first one has been destroyed.
    ObjectKey(u64),
    field = "object key"
);

define_key!(
    /// Identity of a host runtime type.
    TypeKey(u32),
    field = "type key"
);

impl ObjectKey {
    pub fn from_addr(addr: usize) -> Result<Self, InvariantError> {
        let raw = u64::try_from(addr).map_err(|_| InvariantError::AddressOutOfRange {
            field: "object key",
            got: addr,
        })?;
        Self::new(raw)
    }

    /// Identity of whatever lives at `ptr`. The pointer is never dereferenced.
    pub fn from_ptr<T: ?Sized>(ptr: *const T) -> Result<Self, InvariantError> {
        Self::from_addr(ptr.cast::<()>() as usize)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}
