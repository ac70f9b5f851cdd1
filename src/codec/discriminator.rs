// ============================================================================
// Discriminators
// ============================================================================

/// Built-in kinds of the wire format.
///
/// Values `0..=RESERVED_DISCRIMINATORS` belong to the type system; domain
/// types start at `FIRST_USER_DISCRIMINATOR`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemType {
    Unknown = -1,
    Null = 0,
    Boolean = 1,
    Char = 2,
    Byte = 3,
    SByte = 4,
    Int16 = 5,
    UInt16 = 6,
    Int32 = 7,
    UInt32 = 8,
    Int64 = 9,
    UInt64 = 10,
    Single = 11,
    Double = 12,
    Decimal = 13,
    String = 14,
    DateTime = 15,
    Guid = 16,
    Type = 17,
    List = 18,
}

/// Highest discriminator reserved for the type system.
pub const RESERVED_DISCRIMINATORS: i32 = 39;

pub const FIRST_USER_DISCRIMINATOR: i32 = RESERVED_DISCRIMINATORS + 1;

impl SystemType {
    const KINDS: [SystemType; 19] = [
        Self::Null,
        Self::Boolean,
        Self::Char,
        Self::Byte,
        Self::SByte,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Single,
        Self::Double,
        Self::Decimal,
        Self::String,
        Self::DateTime,
        Self::Guid,
        Self::Type,
        Self::List,
    ];

    /// Maps a raw discriminator onto a system kind. `Unknown` is never
    /// returned: it is not a value that may appear on the wire.
    pub fn from_discriminator(discriminator: i32) -> Option<Self> {
        usize::try_from(discriminator)
            .ok()
            .and_then(|index| Self::KINDS.get(index))
            .copied()
    }

    pub fn discriminator(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Char => "char",
            Self::Byte => "byte",
            Self::SByte => "sbyte",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Single => "single",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::DateTime => "datetime",
            Self::Guid => "guid",
            Self::Type => "type",
            Self::List => "list",
        }
    }

    /// Fixed-width and length-prefixed kinds, i.e. everything but
    /// `Null`, `List` and `Unknown`.
    pub fn is_scalar(self) -> bool {
        !matches!(self, Self::Null | Self::List | Self::Unknown)
    }
}

pub fn is_user_discriminator(discriminator: i32) -> bool {
    discriminator >= FIRST_USER_DISCRIMINATOR
}

pub fn is_reserved_discriminator(discriminator: i32) -> bool {
    (0..=RESERVED_DISCRIMINATORS).contains(&discriminator)
}
