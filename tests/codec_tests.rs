mod common;

use chrono::{TimeZone, Utc};
use common::*;
use rustmemorm::codec::SystemType;
use rustmemorm::lifecycle::same_instance;
use rustmemorm::prelude::*;
use rustmemorm::WireList;
use std::sync::Arc;
use uuid::Uuid;

fn roundtrip(context: &Context, value: &WireValue) -> WireValue {
    let bytes = context.encode_value(value).unwrap();
    context.decode_value(&bytes).unwrap()
}

fn entity_list(items: &[&Arc<Entity<Invoice>>]) -> WireValue {
    let items = items
        .iter()
        .map(|invoice| WireValue::Entity((*invoice).clone()))
        .collect();
    WireValue::List(WireList::new(INVOICE, items).unwrap())
}

#[test]
fn test_every_scalar_kind_roundtrips() {
    let fx = fixture();
    let values = vec![
        WireValue::Null,
        WireValue::Boolean(true),
        WireValue::Char('ж'),
        WireValue::Byte(u8::MAX),
        WireValue::SByte(-5),
        WireValue::Int16(i16::MIN),
        WireValue::UInt16(60_000),
        WireValue::Int32(i32::MIN),
        WireValue::UInt32(u32::MAX),
        WireValue::Int64(-1),
        WireValue::UInt64(u64::MAX),
        WireValue::Single(1.5),
        WireValue::Double(f64::NAN),
        WireValue::Decimal(Decimal::new(-1_234_567, 4).unwrap()),
        WireValue::String("héllo wörld".to_string()),
        WireValue::String(String::new()),
        WireValue::DateTime(Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap()),
        WireValue::DateTime(Utc.timestamp_opt(-1, 500_000_000).unwrap()),
        WireValue::Guid(Uuid::new_v4()),
        WireValue::Type(SystemType::Decimal.discriminator()),
        WireValue::Type(INVOICE),
    ];
    for value in values {
        assert_eq!(roundtrip(&fx.context, &value), value, "{:?}", value);
    }
}

#[test]
fn test_datetime_is_kept_at_tick_precision() {
    let fx = fixture();
    let fine = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
    let ticked = Utc.timestamp_opt(1_700_000_000, 123_456_700).unwrap();
    assert_eq!(rustmemorm::codec::to_tick_precision(fine), ticked);
    assert!(matches!(
        fx.context.encode_value(&WireValue::DateTime(fine)).unwrap_err(),
        OrmError::Codec(_)
    ));

    let invoice = fx.context.create::<Invoice>().unwrap();
    invoice.set_issued(fine).unwrap();
    assert_eq!(invoice.issued().unwrap(), ticked);
    invoice.save().unwrap();

    let key = invoice.key();
    fx.context.clear_identity_map().unwrap();
    let reloaded = fx.context.get::<Invoice>(key).unwrap();
    assert_eq!(reloaded.issued().unwrap(), ticked);
}

#[test]
fn test_wire_layout_is_little_endian() {
    let fx = fixture();
    assert_eq!(
        fx.context.encode_value(&WireValue::Int32(7)).unwrap(),
        vec![7, 0, 0, 0, 7, 0, 0, 0]
    );
    assert_eq!(
        fx.context.encode_value(&"ab".into()).unwrap(),
        vec![14, 0, 0, 0, 2, 0, 0, 0, b'a', b'b']
    );
    let list = WireList::new(
        SystemType::Int32.discriminator(),
        vec![WireValue::Int32(1), WireValue::Int32(2)],
    )
    .unwrap();
    assert_eq!(
        fx.context.encode_value(&WireValue::List(list)).unwrap(),
        vec![18, 0, 0, 0, 7, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0]
    );
    assert_eq!(fx.context.encode_entity(None).unwrap(), vec![0, 0, 0, 0]);
}

#[test]
fn test_nested_lists_of_entities_roundtrip() {
    let fx = fixture();
    let a = saved_invoice(&fx.context, "A", &[]);
    let b = saved_invoice(&fx.context, "B", &[]);
    let c = saved_invoice(&fx.context, "C", &[]);

    let nested = WireValue::List(
        WireList::new(
            SystemType::List.discriminator(),
            vec![entity_list(&[&a, &b]), entity_list(&[&c])],
        )
        .unwrap(),
    );
    let decoded = roundtrip(&fx.context, &nested);
    assert_eq!(decoded, nested);

    let outer = decoded.as_list().unwrap();
    assert_eq!(outer.len(), 2);
    let first = outer.items()[0].as_list().unwrap();
    assert_eq!(first.element(), INVOICE);
    // cached instances are returned, not copies
    assert!(same_instance(first.items()[0].as_entity().unwrap().as_ref(), &*a));
    assert!(same_instance(first.items()[1].as_entity().unwrap().as_ref(), &*b));
}

#[test]
fn test_entities_hydrate_in_another_context() {
    let source = fixture();
    let customer = source.context.create::<Customer>().unwrap();
    customer.set_name("Acme".to_string()).unwrap();
    customer.set_credit_limit(Some(money(100_000))).unwrap();
    customer.save().unwrap();

    let invoice = saved_invoice(&source.context, "INV-20", &[]);
    invoice.set_customer(Reference::to(&customer)).unwrap();
    invoice.save().unwrap();
    let bytes = invoice.to_bytes().unwrap();

    let target = fixture();
    let decoded = target
        .context
        .decode_entity(&bytes)
        .unwrap()
        .unwrap()
        .downcast::<Invoice>()
        .unwrap();
    assert_eq!(decoded.key(), invoice.key());
    assert_eq!(decoded.state(), PersistenceState::Original);
    assert_eq!(decoded.version().as_version(), Some(2));
    assert_eq!(decoded.number().unwrap(), "INV-20");
    assert_eq!(decoded.issued().unwrap(), issued_at());
    assert_eq!(decoded.total().unwrap(), money(1999));

    let reference = decoded.customer().unwrap();
    assert_eq!(reference.key(), Some(&customer.key()));
    let stub = reference.require(&target.context).unwrap();
    assert_eq!(stub.state(), PersistenceState::Virtual);

    let again = target.context.find::<Invoice>(&invoice.key()).unwrap().unwrap();
    assert!(Arc::ptr_eq(&again, &decoded));
}

#[test]
fn test_changed_state_survives_transfer() {
    let source = fixture();
    let invoice = saved_invoice(&source.context, "INV-21", &[]);
    invoice.set_number("INV-21b".to_string()).unwrap();
    let bytes = invoice.to_bytes().unwrap();

    let target = fixture();
    let decoded = target
        .context
        .decode_entity(&bytes)
        .unwrap()
        .unwrap()
        .downcast::<Invoice>()
        .unwrap();
    assert_eq!(decoded.state(), PersistenceState::Changed);
    assert_eq!(decoded.number().unwrap(), "INV-21b");
}

#[test]
fn test_loaded_instance_wins_over_stream() {
    let fx = fixture();
    let invoice = saved_invoice(&fx.context, "INV-22", &[]);
    let bytes = invoice.to_bytes().unwrap();
    invoice.set_number("local edit".to_string()).unwrap();

    let decoded = fx.context.decode_entity(&bytes).unwrap().unwrap();
    assert!(same_instance(decoded.as_ref(), &*invoice));
    assert_eq!(invoice.number().unwrap(), "local edit");
}

#[test]
fn test_stub_is_written_as_key_only() {
    let fx = fixture();
    let stub = fx.context.get::<Invoice>(Identity::new()).unwrap();
    let bytes = stub.to_bytes().unwrap();
    // discriminator, state byte, 16-byte key
    assert_eq!(bytes.len(), 4 + 1 + 16);
    assert_eq!(&bytes[..5], &[40, 0, 0, 0, PersistenceState::Virtual.as_byte()]);

    let decoded = fx.context.decode_entity(&bytes).unwrap().unwrap();
    assert!(same_instance(decoded.as_ref(), &*stub));
    assert_eq!(fx.store.count(MapperOp::Select), 0);
}

#[test]
fn test_bare_null_is_absent() {
    let fx = fixture();
    let null = 0i32.to_le_bytes();
    assert!(fx.context.decode_entity(&null).unwrap().is_none());
    assert_eq!(fx.context.decode_value(&null).unwrap(), WireValue::Null);
    assert!(fx.context.identity_map().is_empty());

    let invoice = fx.context.create::<Invoice>().unwrap();
    assert!(invoice.customer().unwrap().is_empty());
    // an empty reference is the last field, written as a bare Null
    assert!(invoice.field_bytes().unwrap().ends_with(&[0, 0, 0, 0]));
}

#[test]
fn test_unknown_discriminators_are_rejected() {
    let fx = fixture();
    for discriminator in [99i32, 30, -1, 19] {
        let bytes = discriminator.to_le_bytes();
        let err = fx.context.decode_value(&bytes).unwrap_err();
        assert!(matches!(err, OrmError::UnknownType(_)), "{}", discriminator);
    }
    let err = fx
        .context
        .encode_value(&WireValue::Type(77))
        .unwrap_err();
    assert!(matches!(err, OrmError::UnknownType(_)));

    let mut forged = SystemType::Type.discriminator().to_le_bytes().to_vec();
    forged.extend_from_slice(&77i32.to_le_bytes());
    assert!(matches!(
        fx.context.decode_value(&forged).unwrap_err(),
        OrmError::UnknownType(_)
    ));
}

#[test]
fn test_malformed_input_is_a_codec_error() {
    let fx = fixture();
    let mut bytes = fx.context.encode_value(&WireValue::Int64(42)).unwrap();

    let truncated = &bytes[..bytes.len() - 1];
    assert!(matches!(
        fx.context.decode_value(truncated).unwrap_err(),
        OrmError::Codec(_)
    ));

    bytes.push(0);
    assert!(matches!(
        fx.context.decode_value(&bytes).unwrap_err(),
        OrmError::Codec(_)
    ));

    let mut bad_bool = SystemType::Boolean.discriminator().to_le_bytes().to_vec();
    bad_bool.push(2);
    assert!(matches!(
        fx.context.decode_value(&bad_bool).unwrap_err(),
        OrmError::Codec(_)
    ));

    // a huge count with no elements fails on the first missing element
    let mut hollow = SystemType::List.discriminator().to_le_bytes().to_vec();
    hollow.extend_from_slice(&SystemType::Int64.discriminator().to_le_bytes());
    hollow.extend_from_slice(&(16 * 1024 * 1024 - 1i32).to_le_bytes());
    assert!(matches!(
        fx.context.decode_value(&hollow).unwrap_err(),
        OrmError::Codec(_)
    ));

    let mut negative = SystemType::List.discriminator().to_le_bytes().to_vec();
    negative.extend_from_slice(&SystemType::Int32.discriminator().to_le_bytes());
    negative.extend_from_slice(&(-1i32).to_le_bytes());
    assert!(matches!(
        fx.context.decode_value(&negative).unwrap_err(),
        OrmError::Codec(_)
    ));
}

#[test]
fn test_limits_from_config_are_enforced() {
    let fx = fixture_with(
        ContextConfig::new("billing")
            .max_nesting_depth(2)
            .max_collection_len(4),
    );
    let int = |v| WireValue::Int32(v);
    let inner = WireValue::List(
        WireList::new(SystemType::Int32.discriminator(), vec![int(1)]).unwrap(),
    );
    let middle = WireValue::List(
        WireList::new(SystemType::List.discriminator(), vec![inner.clone()]).unwrap(),
    );
    let outer = WireValue::List(
        WireList::new(SystemType::List.discriminator(), vec![middle.clone()]).unwrap(),
    );
    assert_eq!(roundtrip(&fx.context, &middle), middle);
    assert!(matches!(
        fx.context.encode_value(&outer).unwrap_err(),
        OrmError::Codec(_)
    ));

    let long = WireValue::String("too long".to_string());
    let bytes = fx.context.encode_value(&long).unwrap();
    assert!(matches!(
        fx.context.decode_value(&bytes).unwrap_err(),
        OrmError::Codec(_)
    ));
}

#[test]
fn test_entity_kind_mismatch_is_reported() {
    let fx = fixture();
    let line = fx.context.create::<InvoiceLine>().unwrap();
    let bytes = line.to_bytes().unwrap();
    let decoded = fx.context.decode_entity(&bytes).unwrap().unwrap();
    assert_eq!(decoded.discriminator(), INVOICE_LINE);
    assert_eq!(decoded.state(), PersistenceState::New);
    assert!(matches!(
        decoded.downcast::<Invoice>().unwrap_err(),
        OrmError::UnknownType(_)
    ));

    let scalar = fx.context.encode_value(&WireValue::Int32(1)).unwrap();
    assert!(matches!(
        fx.context.decode_entity(&scalar).unwrap_err(),
        OrmError::Codec(_)
    ));
}
