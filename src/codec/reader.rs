use super::discriminator::{SystemType, is_user_discriminator};
use super::value::{Decimal, WireList, WireValue};
use super::writer::{NANOS_PER_TICK, TICKS_PER_SECOND};
use crate::core::{OrmError, PersistenceState, Result};
use crate::facade::Context;
use crate::lifecycle::{Entity, Persistent};
use crate::registry::DomainType;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;
use uuid::Uuid;

/// Upper bound on the capacity reserved from a decoded list count; longer
/// lists grow as their elements arrive.
pub(crate) const MAX_PREALLOCATED_ITEMS: usize = 1024;

/// Little-endian decoder bound to a [`Context`].
///
/// User values are rebuilt through the registry and the identity map of the
/// context, so decoding a stored object yields the cached instance.
pub struct WireReader<'a> {
    input: &'a mut dyn Read,
    context: &'a Context,
    depth: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(input: &'a mut dyn Read, context: &'a Context) -> Self {
        Self {
            input,
            context,
            depth: 0,
        }
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(OrmError::Codec(format!("invalid boolean byte {}", other))),
        }
    }

    pub fn read_char(&mut self) -> Result<char> {
        let raw = self.read_u32()?;
        char::from_u32(raw)
            .ok_or_else(|| OrmError::Codec(format!("invalid char scalar {:#x}", raw)))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(i8::from_le_bytes(self.take()?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take()?))
    }

    pub fn read_decimal(&mut self) -> Result<Decimal> {
        let mantissa = i128::from_le_bytes(self.take()?);
        let scale = self.read_u32()?;
        Decimal::new(mantissa, scale)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| OrmError::Codec(format!("invalid utf-8: {}", e)))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_datetime(&mut self) -> Result<DateTime<Utc>> {
        let ticks = self.read_i64()?;
        let secs = ticks.div_euclid(TICKS_PER_SECOND);
        // rem_euclid keeps this in 0..TICKS_PER_SECOND
        let nanos = ticks.rem_euclid(TICKS_PER_SECOND) as u32 * NANOS_PER_TICK;
        DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| OrmError::Codec(format!("datetime tick count {} out of range", ticks)))
    }

    pub fn read_guid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_bytes(self.take()?))
    }

    pub fn read_type(&mut self) -> Result<i32> {
        let discriminator = self.read_i32()?;
        if SystemType::from_discriminator(discriminator).is_none() {
            self.context.registry().entry(discriminator)?;
        }
        Ok(discriminator)
    }

    pub fn read_discriminator(&mut self) -> Result<i32> {
        self.read_i32()
    }

    pub fn read_state(&mut self) -> Result<PersistenceState> {
        PersistenceState::from_byte(self.read_u8()?)
    }

    /// Fails unless `found` is the discriminator a typed read asked for.
    pub fn expect_discriminator(&self, found: i32, expected: i32) -> Result<()> {
        if found == expected {
            return Ok(());
        }
        Err(OrmError::Codec(format!(
            "expected {}, found {}",
            self.kind_name(expected),
            self.kind_name(found)
        )))
    }

    fn kind_name(&self, discriminator: i32) -> String {
        match SystemType::from_discriminator(discriminator) {
            Some(kind) => kind.name().to_string(),
            None => match self.context.registry().entry(discriminator) {
                Ok(entry) => entry.name().to_string(),
                Err(_) => format!("discriminator({})", discriminator),
            },
        }
    }

    /// Polymorphic value. A bare `Null` discriminator is `WireValue::Null`.
    pub fn read_value(&mut self) -> Result<WireValue> {
        let discriminator = self.read_discriminator()?;
        self.read_payload(discriminator)
    }

    /// Payload of a value whose discriminator has already been read.
    pub fn read_payload(&mut self, discriminator: i32) -> Result<WireValue> {
        if is_user_discriminator(discriminator) {
            return self.read_entity_body(discriminator).map(WireValue::Entity);
        }
        let kind = SystemType::from_discriminator(discriminator)
            .ok_or_else(|| OrmError::UnknownType(format!("discriminator({})", discriminator)))?;
        let value = match kind {
            SystemType::Null => WireValue::Null,
            SystemType::Boolean => WireValue::Boolean(self.read_bool()?),
            SystemType::Char => WireValue::Char(self.read_char()?),
            SystemType::Byte => WireValue::Byte(self.read_u8()?),
            SystemType::SByte => WireValue::SByte(self.read_i8()?),
            SystemType::Int16 => WireValue::Int16(self.read_i16()?),
            SystemType::UInt16 => WireValue::UInt16(self.read_u16()?),
            SystemType::Int32 => WireValue::Int32(self.read_i32()?),
            SystemType::UInt32 => WireValue::UInt32(self.read_u32()?),
            SystemType::Int64 => WireValue::Int64(self.read_i64()?),
            SystemType::UInt64 => WireValue::UInt64(self.read_u64()?),
            SystemType::Single => WireValue::Single(self.read_f32()?),
            SystemType::Double => WireValue::Double(self.read_f64()?),
            SystemType::Decimal => WireValue::Decimal(self.read_decimal()?),
            SystemType::String => WireValue::String(self.read_string()?),
            SystemType::DateTime => WireValue::DateTime(self.read_datetime()?),
            SystemType::Guid => WireValue::Guid(self.read_guid()?),
            SystemType::Type => WireValue::Type(self.read_type()?),
            SystemType::List => WireValue::List(self.read_list_payload()?),
            SystemType::Unknown => {
                return Err(OrmError::UnknownType(format!(
                    "discriminator({})",
                    discriminator
                )));
            }
        };
        Ok(value)
    }

    fn read_list_payload(&mut self) -> Result<WireList> {
        self.nested(|reader| {
            let (element, count) = reader.read_list_header()?;
            let mut items = Vec::with_capacity(count.min(MAX_PREALLOCATED_ITEMS));
            for _ in 0..count {
                items.push(reader.read_payload(element)?);
            }
            Ok(WireList::from_decoded(element, items))
        })
    }

    /// `[element discriminator][count]`, both validated.
    pub fn read_list_header(&mut self) -> Result<(i32, usize)> {
        let element = self.read_discriminator()?;
        if element == SystemType::Null.discriminator() {
            return Err(OrmError::Codec("list element kind cannot be null".into()));
        }
        if SystemType::from_discriminator(element).is_none() {
            self.context.registry().entry(element)?;
        }
        let count = self.read_i32()?;
        let count = usize::try_from(count)
            .map_err(|_| OrmError::Codec(format!("negative list count {}", count)))?;
        self.check_len(count)?;
        Ok((element, count))
    }

    /// A whole entity value, `None` for a bare `Null`.
    pub fn read_entity_dyn(&mut self) -> Result<Option<Arc<dyn Persistent>>> {
        let discriminator = self.read_discriminator()?;
        if discriminator == SystemType::Null.discriminator() {
            return Ok(None);
        }
        if !is_user_discriminator(discriminator) {
            return Err(OrmError::Codec(format!(
                "expected an entity, found {}",
                self.kind_name(discriminator)
            )));
        }
        self.read_entity_body(discriminator).map(Some)
    }

    /// Typed variant of [`read_entity_dyn`](Self::read_entity_dyn).
    pub fn read_entity<T: DomainType>(&mut self) -> Result<Option<Arc<Entity<T>>>> {
        let discriminator = self.read_discriminator()?;
        if discriminator == SystemType::Null.discriminator() {
            return Ok(None);
        }
        self.expect_discriminator(discriminator, T::DISCRIMINATOR)?;
        self.read_typed_entity_body::<T>().map(Some)
    }

    /// `[state][key]...` of a user value, resolved through the registry.
    pub fn read_entity_body(&mut self, discriminator: i32) -> Result<Arc<dyn Persistent>> {
        let entry = self.context.registry().entry(discriminator)?;
        self.nested(|reader| {
            let state = reader.read_state()?;
            entry.decode(state, reader)
        })
    }

    pub fn read_typed_entity_body<T: DomainType>(&mut self) -> Result<Arc<Entity<T>>> {
        self.context.registry().entry(T::DISCRIMINATOR)?;
        self.nested(|reader| {
            let state = reader.read_state()?;
            Entity::<T>::decode_body(state, reader)
        })
    }

    pub fn nested<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let limit = self.context.config().max_nesting_depth;
        if self.depth >= limit {
            return Err(OrmError::Codec(format!(
                "nesting depth exceeds {}",
                limit
            )));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// Fails unless the stream has been consumed completely.
    pub fn finish(&mut self) -> Result<()> {
        let mut extra = [0u8; 1];
        match self.input.read(&mut extra)? {
            0 => Ok(()),
            _ => Err(OrmError::Codec("trailing bytes after value".into())),
        }
    }

    fn read_len(&mut self) -> Result<usize> {
        let len = self.read_u32()? as usize;
        self.check_len(len)?;
        Ok(len)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        let limit = self.context.config().max_collection_len;
        if len > limit {
            return Err(OrmError::Codec(format!(
                "length {} exceeds limit {}",
                len, limit
            )));
        }
        Ok(())
    }
}
