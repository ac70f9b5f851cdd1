use super::discriminator::SystemType;
use super::reader::{MAX_PREALLOCATED_ITEMS, WireReader};
use super::value::Decimal;
use super::writer::{WireWriter, to_tick_precision};
use crate::core::{Key, OrmError, PersistenceState, Result};
use crate::lifecycle::{Entity, Reference};
use crate::registry::DomainType;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Statically typed field codec used by [`DomainType`] field payloads.
///
/// A field is written as a tagged value (`[discriminator][payload]`); list
/// elements use the untagged payload.
pub trait WireField: Sized {
    const DISCRIMINATOR: i32;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()>;

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self>;

    /// Rounds a value down to what survives the wire. Setters apply it so
    /// memory and storage agree.
    fn to_wire_precision(self) -> Self {
        self
    }

    fn write_field(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_discriminator(Self::DISCRIMINATOR)?;
        self.write_payload(writer)
    }

    fn read_field(reader: &mut WireReader<'_>) -> Result<Self> {
        let discriminator = reader.read_discriminator()?;
        Self::read_tagged(discriminator, reader)
    }

    fn read_tagged(discriminator: i32, reader: &mut WireReader<'_>) -> Result<Self> {
        reader.expect_discriminator(discriminator, Self::DISCRIMINATOR)?;
        Self::read_payload(reader)
    }
}

macro_rules! scalar_field {
    ($($ty:ty => $kind:ident, $write:ident, $read:ident;)+) => {
        $(
            impl WireField for $ty {
                const DISCRIMINATOR: i32 = SystemType::$kind as i32;

                fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
                    writer.$write(*self)
                }

                fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
                    reader.$read()
                }
            }
        )+
    };
}

scalar_field! {
    bool => Boolean, write_bool, read_bool;
    char => Char, write_char, read_char;
    u8 => Byte, write_u8, read_u8;
    i8 => SByte, write_i8, read_i8;
    i16 => Int16, write_i16, read_i16;
    u16 => UInt16, write_u16, read_u16;
    i32 => Int32, write_i32, read_i32;
    u32 => UInt32, write_u32, read_u32;
    i64 => Int64, write_i64, read_i64;
    u64 => UInt64, write_u64, read_u64;
    f32 => Single, write_f32, read_f32;
    f64 => Double, write_f64, read_f64;
}

impl WireField for Decimal {
    const DISCRIMINATOR: i32 = SystemType::Decimal as i32;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_decimal(self)
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.read_decimal()
    }
}

impl WireField for String {
    const DISCRIMINATOR: i32 = SystemType::String as i32;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_string(self)
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.read_string()
    }
}

impl WireField for DateTime<Utc> {
    const DISCRIMINATOR: i32 = SystemType::DateTime as i32;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_datetime(self)
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.read_datetime()
    }

    fn to_wire_precision(self) -> Self {
        to_tick_precision(self)
    }
}

impl WireField for Uuid {
    const DISCRIMINATOR: i32 = SystemType::Guid as i32;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_guid(self)
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.read_guid()
    }
}

impl<V: WireField> WireField for Vec<V> {
    const DISCRIMINATOR: i32 = SystemType::List as i32;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.nested(|writer| {
            writer.write_list_header(V::DISCRIMINATOR, self.len())?;
            for item in self {
                item.write_payload(writer)?;
            }
            Ok(())
        })
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.nested(|reader| {
            let (element, count) = reader.read_list_header()?;
            reader.expect_discriminator(element, V::DISCRIMINATOR)?;
            let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATED_ITEMS));
            for _ in 0..count {
                items.push(V::read_payload(reader)?);
            }
            Ok(items)
        })
    }

    fn to_wire_precision(self) -> Self {
        self.into_iter().map(V::to_wire_precision).collect()
    }
}

/// An embedded entity, written in full (or as a stub while `Virtual`).
impl<T: DomainType> WireField for Arc<Entity<T>> {
    const DISCRIMINATOR: i32 = T::DISCRIMINATOR;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_entity_body(self.as_ref())
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        reader.read_typed_entity_body::<T>()
    }
}

/// `None` is the bare `Null` discriminator. Optional values cannot be list
/// elements, since element payloads carry no tag.
impl<V: WireField> WireField for Option<V> {
    const DISCRIMINATOR: i32 = V::DISCRIMINATOR;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        match self {
            Some(value) => value.write_payload(writer),
            None => Err(OrmError::Codec("null list element".into())),
        }
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        V::read_payload(reader).map(Some)
    }

    fn to_wire_precision(self) -> Self {
        self.map(V::to_wire_precision)
    }

    fn write_field(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        match self {
            Some(value) => value.write_field(writer),
            None => writer.write_null(),
        }
    }

    fn read_tagged(discriminator: i32, reader: &mut WireReader<'_>) -> Result<Self> {
        if discriminator == SystemType::Null.discriminator() {
            return Ok(None);
        }
        V::read_tagged(discriminator, reader).map(Some)
    }
}

/// References travel as `[discriminator][Virtual][key]`, or `Null` when empty.
impl<T: DomainType> WireField for Reference<T> {
    const DISCRIMINATOR: i32 = T::DISCRIMINATOR;

    fn write_payload(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        match self.key() {
            Some(key) => writer.nested(|writer| {
                writer.write_u8(PersistenceState::Virtual.as_byte())?;
                key.encode(writer)
            }),
            None => Err(OrmError::Codec("null list element".into())),
        }
    }

    fn read_payload(reader: &mut WireReader<'_>) -> Result<Self> {
        let target = reader.read_typed_entity_body::<T>()?;
        Ok(Reference::to(&target))
    }

    fn write_field(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        if self.is_empty() {
            return writer.write_null();
        }
        writer.context().registry().entry(T::DISCRIMINATOR)?;
        writer.write_discriminator(T::DISCRIMINATOR)?;
        self.write_payload(writer)
    }

    fn read_tagged(discriminator: i32, reader: &mut WireReader<'_>) -> Result<Self> {
        if discriminator == SystemType::Null.discriminator() {
            return Ok(Reference::empty());
        }
        reader.expect_discriminator(discriminator, T::DISCRIMINATOR)?;
        Self::read_payload(reader)
    }
}
