//! Core identifier types for Tessera.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, invalid = $invalid:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Sentinel value that never names a real object.
            pub const INVALID: Self = Self($invalid);

            /// Creates an identifier from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Returns the following identifier.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                Self(self.0.saturating_add(1))
            }

            /// Checks if this is a valid identifier.
            #[inline]
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 != Self::INVALID.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if *self == Self::INVALID {
                    write!(f, concat!(stringify!($name), "(INVALID)"))
                } else {
                    write!(f, concat!(stringify!($name), "({})"), self.0)
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(id: u64) -> Self {
                Self::new(id)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Transaction identifier.
    ///
    /// Transaction IDs are monotonically increasing. `TxnId::INVALID` marks
    /// system writes (checkpoint images, recovered rows) that belong to no
    /// user transaction.
    TxnId,
    invalid = 0
);

define_id!(
    /// Table identifier, assigned in definition order by the catalog.
    TableId,
    invalid = 0
);

define_id!(
    /// Row identifier.
    ///
    /// Stable for the lifetime of a row and independent of its key values.
    RowId,
    invalid = 0
);

define_id!(
    /// Log sequence number. Every WAL record gets the next one.
    Lsn,
    invalid = 0
);

define_id!(
    /// Logical commit timestamp.
    ///
    /// Issued by the commit clock; a snapshot at `t` sees every version
    /// committed at or before `t`.
    Timestamp,
    invalid = u64::MAX
);

impl TxnId {
    /// First transaction ID handed out by a fresh engine.
    pub const MIN: Self = Self(1);
}

impl TableId {
    /// First table ID handed out by a fresh catalog.
    pub const FIRST: Self = Self(1);
}

impl RowId {
    /// First row ID handed out by a fresh table.
    pub const FIRST: Self = Self(1);
}

impl Lsn {
    /// First valid LSN.
    pub const FIRST: Self = Self(1);
}

impl Default for Lsn {
    fn default() -> Self {
        Self::INVALID
    }
}

impl Timestamp {
    /// The timestamp before any commit. Bootstrap and recovered data carry it.
    pub const ZERO: Self = Self(0);
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A row address: the owning table plus the row's identifier.
///
/// Used as the lock resource and read/write set item for row-level
/// concurrency control.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    /// Owning table.
    pub table: TableId,
    /// Row within the table.
    pub row: RowId,
}

impl RowKey {
    /// Creates a new row key.
    #[inline]
    #[must_use]
    pub const fn new(table: TableId, row: RowId) -> Self {
        Self { table, row }
    }
}

impl fmt::Debug for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowKey({}:{})", self.table.0, self.row.0)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table.0, self.row.0)
    }
}
