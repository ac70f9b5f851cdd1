use super::discriminator::SystemType;
use crate::core::{OrmError, Result};
use crate::lifecycle::Persistent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Fixed-point decimal: `mantissa * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    pub const MAX_SCALE: u32 = 28;

    pub fn new(mantissa: i128, scale: u32) -> Result<Self> {
        if scale > Self::MAX_SCALE {
            return Err(OrmError::Codec(format!(
                "decimal scale {} exceeds {}",
                scale,
                Self::MAX_SCALE
            )));
        }
        Ok(Self { mantissa, scale })
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let divisor = 10i128.pow(self.scale);
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let abs = self.mantissa.unsigned_abs();
        let divisor = divisor as u128;
        write!(
            f,
            "{}{}.{:0width$}",
            sign,
            abs / divisor,
            abs % divisor,
            width = self.scale as usize
        )
    }
}

/// Homogeneous list: every item is of kind `element`.
#[derive(Debug, Clone, PartialEq)]
pub struct WireList {
    element: i32,
    items: Vec<WireValue>,
}

impl WireList {
    /// Builds a list after checking each item against the element kind.
    pub fn new(element: i32, items: Vec<WireValue>) -> Result<Self> {
        if element == SystemType::Null.discriminator() {
            return Err(OrmError::Codec("list element kind cannot be null".into()));
        }
        for item in &items {
            // list elements are written without their own tag, so null has no encoding
            if item.discriminator() != element {
                return Err(OrmError::Codec(format!(
                    "list of kind {} cannot hold a value of kind {}",
                    element,
                    item.discriminator()
                )));
            }
        }
        Ok(Self { element, items })
    }

    pub(crate) fn from_decoded(element: i32, items: Vec<WireValue>) -> Self {
        Self { element, items }
    }

    pub fn element(&self) -> i32 {
        self.element
    }

    pub fn items(&self) -> &[WireValue] {
        &self.items
    }

    pub fn into_items(self) -> Vec<WireValue> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A polymorphic, discriminator-tagged value.
#[derive(Clone)]
pub enum WireValue {
    Null,
    Boolean(bool),
    Char(char),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    DateTime(DateTime<Utc>),
    Guid(Uuid),
    /// A type, carried as its discriminator.
    Type(i32),
    List(WireList),
    Entity(Arc<dyn Persistent>),
}

impl WireValue {
    pub fn discriminator(&self) -> i32 {
        let kind = match self {
            Self::Null => SystemType::Null,
            Self::Boolean(_) => SystemType::Boolean,
            Self::Char(_) => SystemType::Char,
            Self::Byte(_) => SystemType::Byte,
            Self::SByte(_) => SystemType::SByte,
            Self::Int16(_) => SystemType::Int16,
            Self::UInt16(_) => SystemType::UInt16,
            Self::Int32(_) => SystemType::Int32,
            Self::UInt32(_) => SystemType::UInt32,
            Self::Int64(_) => SystemType::Int64,
            Self::UInt64(_) => SystemType::UInt64,
            Self::Single(_) => SystemType::Single,
            Self::Double(_) => SystemType::Double,
            Self::Decimal(_) => SystemType::Decimal,
            Self::String(_) => SystemType::String,
            Self::DateTime(_) => SystemType::DateTime,
            Self::Guid(_) => SystemType::Guid,
            Self::Type(_) => SystemType::Type,
            Self::List(_) => SystemType::List,
            Self::Entity(entity) => return entity.discriminator(),
        };
        kind.discriminator()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_entity(&self) -> Option<&Arc<dyn Persistent>> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&WireList> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for WireValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::SByte(a), Self::SByte(b)) => a == b,
            (Self::Int16(a), Self::Int16(b)) => a == b,
            (Self::UInt16(a), Self::UInt16(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) => a == b,
            (Self::UInt32(a), Self::UInt32(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::UInt64(a), Self::UInt64(b)) => a == b,
            // bitwise, so NaN payloads round-trip as equal
            (Self::Single(a), Self::Single(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Decimal(a), Self::Decimal(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::DateTime(a), Self::DateTime(b)) => a == b,
            (Self::Guid(a), Self::Guid(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => entities_equivalent(a.as_ref(), b.as_ref()),
            _ => false,
        }
    }
}

/// Two entities are equivalent when their serialized forms match: same
/// discriminator, state, key, stamp and field payload.
fn entities_equivalent(a: &dyn Persistent, b: &dyn Persistent) -> bool {
    if a.discriminator() != b.discriminator() || a.state().is_stub() != b.state().is_stub() {
        return false;
    }
    match (a.to_bytes(), b.to_bytes()) {
        (Ok(left), Ok(right)) => left == right,
        _ => false,
    }
}

impl fmt::Debug for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Boolean(v) => f.debug_tuple("Boolean").field(v).finish(),
            Self::Char(v) => f.debug_tuple("Char").field(v).finish(),
            Self::Byte(v) => f.debug_tuple("Byte").field(v).finish(),
            Self::SByte(v) => f.debug_tuple("SByte").field(v).finish(),
            Self::Int16(v) => f.debug_tuple("Int16").field(v).finish(),
            Self::UInt16(v) => f.debug_tuple("UInt16").field(v).finish(),
            Self::Int32(v) => f.debug_tuple("Int32").field(v).finish(),
            Self::UInt32(v) => f.debug_tuple("UInt32").field(v).finish(),
            Self::Int64(v) => f.debug_tuple("Int64").field(v).finish(),
            Self::UInt64(v) => f.debug_tuple("UInt64").field(v).finish(),
            Self::Single(v) => f.debug_tuple("Single").field(v).finish(),
            Self::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Self::Decimal(v) => f.debug_tuple("Decimal").field(v).finish(),
            Self::String(v) => f.debug_tuple("String").field(v).finish(),
            Self::DateTime(v) => f.debug_tuple("DateTime").field(v).finish(),
            Self::Guid(v) => f.debug_tuple("Guid").field(v).finish(),
            Self::Type(v) => f.debug_tuple("Type").field(v).finish(),
            Self::List(v) => f.debug_tuple("List").field(v).finish(),
            Self::Entity(entity) => write!(
                f,
                "Entity({}#{} {})",
                entity.type_name(),
                entity.key_string(),
                entity.state()
            ),
        }
    }
}

macro_rules! wire_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for WireValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

wire_value_from! {
    bool => Boolean,
    char => Char,
    u8 => Byte,
    i8 => SByte,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Single,
    f64 => Double,
    Decimal => Decimal,
    String => String,
    DateTime<Utc> => DateTime,
    Uuid => Guid,
    WireList => List,
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl<T: Persistent> From<Arc<T>> for WireValue {
    fn from(entity: Arc<T>) -> Self {
        Self::Entity(entity)
    }
}

impl<T: Into<WireValue>> From<Option<T>> for WireValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_display() {
        assert_eq!(Decimal::new(12345, 2).unwrap().to_string(), "123.45");
        assert_eq!(Decimal::new(-5, 3).unwrap().to_string(), "-0.005");
        assert_eq!(Decimal::new(7, 0).unwrap().to_string(), "7");
        assert!(Decimal::new(1, 29).is_err());
    }

    #[test]
    fn test_list_rejects_foreign_items() {
        let ok = WireList::new(
            SystemType::Int32.discriminator(),
            vec![WireValue::Int32(1), WireValue::Int32(2)],
        );
        assert!(ok.is_ok());

        let mixed = WireList::new(
            SystemType::Int32.discriminator(),
            vec![WireValue::Int32(1), WireValue::from("two")],
        );
        assert!(matches!(mixed, Err(OrmError::Codec(_))));

        let with_null = WireList::new(SystemType::String.discriminator(), vec![WireValue::Null]);
        assert!(with_null.is_err());

        let nulls = WireList::new(SystemType::Null.discriminator(), vec![]);
        assert!(nulls.is_err());
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(WireValue::Double(f64::NAN), WireValue::Double(f64::NAN));
        assert_ne!(WireValue::Double(0.0), WireValue::Double(-0.0));
    }
}
