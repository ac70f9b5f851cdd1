use super::discriminator::SystemType;
use super::value::{Decimal, WireList, WireValue};
use crate::core::{OrmError, Result};
use crate::facade::Context;
use crate::lifecycle::Persistent;
use chrono::{DateTime, Timelike, Utc};
use std::io::Write;
use uuid::Uuid;

/// 100-nanosecond ticks per second.
pub(crate) const TICKS_PER_SECOND: i64 = 10_000_000;
pub(crate) const NANOS_PER_TICK: u32 = 100;

/// Drops the sub-tick nanoseconds, the finest precision the wire carries.
pub fn to_tick_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    let nanos = value.timestamp_subsec_nanos();
    value
        .with_nanosecond(nanos - nanos % NANOS_PER_TICK)
        .unwrap_or(value)
}

/// Little-endian encoder bound to a [`Context`].
///
/// The context supplies the type registry (user values and `Type` values are
/// checked against it) and the nesting limit.
pub struct WireWriter<'a> {
    out: &'a mut dyn Write,
    context: &'a Context,
    depth: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(out: &'a mut dyn Write, context: &'a Context) -> Self {
        Self {
            out,
            context,
            depth: 0,
        }
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.put(&[u8::from(value)])
    }

    /// Chars travel as their `u32` scalar value.
    pub fn write_char(&mut self, value: char) -> Result<()> {
        self.write_u32(u32::from(value))
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.put(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.put(&value.to_le_bytes())
    }

    /// `[mantissa:i128][scale:u32]`
    pub fn write_decimal(&mut self, value: &Decimal) -> Result<()> {
        self.put(&value.mantissa().to_le_bytes())?;
        self.write_u32(value.scale())
    }

    /// `[len:u32][utf-8 bytes]`
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_len(value.len())?;
        self.put(value.as_bytes())
    }

    /// `[len:u32][raw bytes]`
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_len(value.len())?;
        self.put(value)
    }

    /// Signed count of 100ns ticks since the Unix epoch. Values finer than
    /// a tick are rejected; see [`to_tick_precision`].
    pub fn write_datetime(&mut self, value: &DateTime<Utc>) -> Result<()> {
        if value.timestamp_subsec_nanos() % NANOS_PER_TICK != 0 {
            return Err(OrmError::Codec(format!(
                "datetime {} is finer than 100ns ticks",
                value
            )));
        }
        let ticks = value
            .timestamp()
            .checked_mul(TICKS_PER_SECOND)
            .and_then(|t| t.checked_add(i64::from(value.timestamp_subsec_nanos() / NANOS_PER_TICK)))
            .ok_or_else(|| OrmError::Codec(format!("datetime {} out of tick range", value)))?;
        self.write_i64(ticks)
    }

    pub fn write_guid(&mut self, value: &Uuid) -> Result<()> {
        self.put(value.as_bytes())
    }

    /// A type reference, written as its discriminator.
    pub fn write_type(&mut self, discriminator: i32) -> Result<()> {
        if SystemType::from_discriminator(discriminator).is_none() {
            self.context.registry().entry(discriminator)?;
        }
        self.write_i32(discriminator)
    }

    pub fn write_discriminator(&mut self, discriminator: i32) -> Result<()> {
        self.write_i32(discriminator)
    }

    pub fn write_null(&mut self) -> Result<()> {
        self.write_discriminator(SystemType::Null.discriminator())
    }

    /// Polymorphic value: `[discriminator][payload]`.
    pub fn write_value(&mut self, value: &WireValue) -> Result<()> {
        self.write_discriminator(value.discriminator())?;
        self.write_payload(value)
    }

    /// The payload of `value` without its discriminator. This is also the
    /// form list elements take.
    pub fn write_payload(&mut self, value: &WireValue) -> Result<()> {
        match value {
            WireValue::Null => Ok(()),
            WireValue::Boolean(v) => self.write_bool(*v),
            WireValue::Char(v) => self.write_char(*v),
            WireValue::Byte(v) => self.write_u8(*v),
            WireValue::SByte(v) => self.write_i8(*v),
            WireValue::Int16(v) => self.write_i16(*v),
            WireValue::UInt16(v) => self.write_u16(*v),
            WireValue::Int32(v) => self.write_i32(*v),
            WireValue::UInt32(v) => self.write_u32(*v),
            WireValue::Int64(v) => self.write_i64(*v),
            WireValue::UInt64(v) => self.write_u64(*v),
            WireValue::Single(v) => self.write_f32(*v),
            WireValue::Double(v) => self.write_f64(*v),
            WireValue::Decimal(v) => self.write_decimal(v),
            WireValue::String(v) => self.write_string(v),
            WireValue::DateTime(v) => self.write_datetime(v),
            WireValue::Guid(v) => self.write_guid(v),
            WireValue::Type(v) => self.write_type(*v),
            WireValue::List(list) => self.write_list_payload(list),
            WireValue::Entity(entity) => self.write_entity_body(entity.as_ref()),
        }
    }

    /// `[element discriminator][count:i32][count x element payload]`
    fn write_list_payload(&mut self, list: &WireList) -> Result<()> {
        self.nested(|writer| {
            writer.write_discriminator(list.element())?;
            writer.write_count(list.len())?;
            for item in list.items() {
                writer.write_payload(item)?;
            }
            Ok(())
        })
    }

    /// Header of a typed list; the caller writes `count` element payloads.
    pub fn write_list_header(&mut self, element: i32, count: usize) -> Result<()> {
        self.write_discriminator(element)?;
        self.write_count(count)
    }

    /// A whole entity (`[discriminator][state][key]...`) or `Null`.
    pub fn write_entity(&mut self, entity: Option<&dyn Persistent>) -> Result<()> {
        match entity {
            None => self.write_null(),
            Some(entity) => {
                self.write_discriminator(entity.discriminator())?;
                self.write_entity_body(entity)
            }
        }
    }

    /// Everything after the entity's discriminator.
    pub fn write_entity_body(&mut self, entity: &dyn Persistent) -> Result<()> {
        self.context.registry().entry(entity.discriminator())?;
        self.nested(|writer| entity.encode_body(writer))
    }

    /// Runs `f` one nesting level deeper, failing once the configured
    /// depth is exceeded (self-referencing object graphs end here).
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

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| OrmError::Codec(format!("length {} does not fit in u32", len)))?;
        self.write_u32(len)
    }

    fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| OrmError::Codec(format!("list of {} items is too long", count)))?;
        self.write_i32(count)
    }
}
