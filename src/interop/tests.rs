//! Test suite for the interop module

use super::*;
use crate::errors::{BridgeError, Hresult};
use crate::host::{ManagedValue, ValueHost};
use proptest::prelude::*;

fn convert(value: TypedValue) -> Result<Conversion<ManagedValue>, ConversionError> {
    to_managed_object(&ValueHost::new(), &value, &ConvertOptions::default())
}

fn convert_legacy(value: TypedValue) -> Result<Conversion<ManagedValue>, ConversionError> {
    let options = ConvertOptions {
        int64: Int64Policy::Legacy32,
        ..ConvertOptions::default()
    };
    to_managed_object(&ValueHost::new(), &value, &options)
}

fn object(value: TypedValue) -> ManagedValue {
    match convert(value) {
        Ok(Conversion::Object(obj)) => obj,
        other => panic!("expected an object, got {:?}", other),
    }
}

#[test]
fn test_slot_size() {
    assert_eq!(SLOT_SIZE, 16);
    assert_eq!(core::mem::size_of::<Slot>(), SLOT_SIZE);
}

#[test]
fn test_var_type_flags() {
    let vt = VarType(VarType::BYREF | VarType::ARRAY | VarType::I4.0);
    assert!(vt.is_byref());
    assert!(vt.is_array());
    assert_eq!(vt.base(), VarType::I4);
    assert!(!VarType::BSTR.is_byref());
}

#[test]
fn test_scalar_conversions() {
    assert_eq!(object(TypedValue::I8(-5)), ManagedValue::Byte(-5));
    assert_eq!(object(TypedValue::I16(-300)), ManagedValue::Short(-300));
    assert_eq!(object(TypedValue::I32(70_000)), ManagedValue::Integer(70_000));
    assert_eq!(object(TypedValue::Int(-1)), ManagedValue::Integer(-1));
    assert_eq!(object(TypedValue::U8(200)), ManagedValue::Short(200));
    assert_eq!(object(TypedValue::U16(60_000)), ManagedValue::Integer(60_000));
    assert_eq!(object(TypedValue::U32(4_000_000_000)), ManagedValue::Long(4_000_000_000));
    assert_eq!(object(TypedValue::UInt(7)), ManagedValue::Long(7));
    assert_eq!(object(TypedValue::F32(1.5)), ManagedValue::Float(1.5));
    assert_eq!(object(TypedValue::F64(-2.25)), ManagedValue::Double(-2.25));
    assert_eq!(object(TypedValue::Bool(true)), ManagedValue::Boolean(true));
    assert_eq!(
        object(TypedValue::String("héllo".into())),
        ManagedValue::String("héllo".into())
    );
}

#[test]
fn test_int64_full_policy() {
    assert_eq!(object(TypedValue::I64(0x1_0000_0005)), ManagedValue::Long(0x1_0000_0005));
    assert_eq!(object(TypedValue::U64(u64::MAX)), ManagedValue::Long(-1));
}

#[test]
fn test_int64_legacy_policy_truncates_to_32_bits() {
    let narrowed = convert_legacy(TypedValue::I64(0x1_0000_0005)).unwrap();
    assert_eq!(narrowed, Conversion::Object(ManagedValue::Long(5)));

    let negative = convert_legacy(TypedValue::I64(0x8000_0000)).unwrap();
    assert_eq!(negative, Conversion::Object(ManagedValue::Long(i64::from(i32::MIN))));

    let unsigned = convert_legacy(TypedValue::U64(0xFFFF_FFFF_0000_0009)).unwrap();
    assert_eq!(unsigned, Conversion::Object(ManagedValue::Long(9)));
}

#[test]
fn test_nothing_values_produce_no_object() {
    for value in [TypedValue::Empty, TypedValue::Null, TypedValue::Error(-1)] {
        let conversion = convert(value).unwrap();
        assert!(!conversion.object_produced());
        assert_eq!(conversion.into_option(), None);
    }
}

#[test]
fn test_references_are_dereferenced() {
    let value = TypedValue::ByRef(Box::new(TypedValue::I32(9)));
    assert_eq!(object(value), ManagedValue::Integer(9));

    let nested = TypedValue::VariantRef(Box::new(TypedValue::ByRef(Box::new(
        TypedValue::String("x".into()),
    ))));
    assert_eq!(object(nested), ManagedValue::String("x".into()));

    let empty = TypedValue::VariantRef(Box::new(TypedValue::Null));
    assert!(!convert(empty).unwrap().object_produced());
}

#[test]
fn test_byref_array_is_bad_variant_type() {
    let err = convert(TypedValue::ByRefArray).unwrap_err();
    assert_eq!(err.status, Hresult::DISP_E_BADVARTYPE);

    let wrapped = TypedValue::VariantRef(Box::new(TypedValue::ByRefArray));
    let err = convert(wrapped).unwrap_err();
    assert_eq!(err.status, Hresult::DISP_E_BADVARTYPE);
    assert_eq!(err.tag, VarType::VARIANT.by_ref());
}

#[test]
fn test_unknown_tag_is_bad_variant_type() {
    let err = convert(TypedValue::Other(VarType::DISPATCH)).unwrap_err();
    assert_eq!(err.tag, VarType::DISPATCH);
    assert_eq!(err.status, Hresult::DISP_E_BADVARTYPE);
}

#[test]
fn test_reference_depth_is_bounded() {
    let mut value = TypedValue::I32(1);
    for _ in 0..9 {
        value = TypedValue::ByRef(Box::new(value));
    }
    let err = convert(value).unwrap_err();
    assert_eq!(err.status, Hresult::DISP_E_BADVARTYPE);

    let mut shallow = TypedValue::I32(1);
    for _ in 0..8 {
        shallow = TypedValue::ByRef(Box::new(shallow));
    }
    assert_eq!(object(shallow), ManagedValue::Integer(1));
}

#[test]
fn test_decode_absent_and_empty() {
    let strings = StringTable::new();
    assert_eq!(ArgumentList::decode(None, &strings).unwrap().len(), 0);
    assert!(ArgumentList::decode(Some(&[]), &strings).unwrap().is_empty());
}

#[test]
fn test_decode_rejects_partial_slot() {
    let strings = StringTable::new();
    let err = ArgumentList::decode(Some(&[0u8; 17]), &strings).unwrap_err();
    assert_eq!(
        err,
        BridgeError::InvalidArgumentBuffer {
            length: 17,
            slot_size: SLOT_SIZE
        }
    );
}

#[test]
fn test_decode_copies_caller_buffer() {
    let strings = StringTable::new();
    let mut buffer = encode_arguments(&strings, &[ManagedValue::Integer(41)]).unwrap();
    let args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
    buffer.iter_mut().for_each(|b| *b = 0xAA);
    assert_eq!(args.typed_value(0), Some(Ok(TypedValue::I32(41))));
}

#[test]
fn test_decode_defers_tag_validation() {
    let strings = StringTable::new();
    let bad = Slot::with_payload(VarType::DISPATCH, &[1, 2, 3]);
    let good = Slot::with_payload(VarType::I2, &7i16.to_le_bytes());
    let mut buffer = Vec::new();
    buffer.extend_from_slice(bad.as_bytes());
    buffer.extend_from_slice(good.as_bytes());

    let args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
    assert_eq!(args.len(), 2);
    assert_eq!(args.typed_value(0), Some(Err(Hresult::DISP_E_BADVARTYPE)));
    assert_eq!(args.typed_value(1), Some(Ok(TypedValue::I16(7))));
    assert_eq!(args.typed_value(2), None);
}

#[test]
fn test_byref_slots() {
    let strings = StringTable::new();
    let array = Slot::with_payload(VarType(VarType::BYREF | VarType::ARRAY | VarType::I4.0), &[]);
    let pointer = Slot::with_payload(VarType::I4.by_ref(), &[0xde, 0xad]);
    let mut buffer = Vec::new();
    buffer.extend_from_slice(array.as_bytes());
    buffer.extend_from_slice(pointer.as_bytes());

    let args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
    assert_eq!(args.typed_value(0), Some(Err(Hresult::DISP_E_BADVARTYPE)));
    assert_eq!(args.typed_value(1), Some(Err(Hresult::DISP_E_BADVARTYPE)));
}

#[test]
fn test_encode_reverses_and_round_trips_through_decode() {
    let strings = StringTable::new();
    let buffer = encode_arguments(
        &strings,
        &[
            ManagedValue::Integer(1),
            ManagedValue::String("two".into()),
            ManagedValue::Boolean(true),
            ManagedValue::Long(4),
            ManagedValue::Null,
        ],
    )
    .unwrap();
    assert_eq!(buffer.len(), 5 * SLOT_SIZE);

    let args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
    let values: Vec<_> = args.typed_values().collect::<Result<_, _>>().unwrap();
    assert_eq!(
        values,
        vec![
            TypedValue::Null,
            TypedValue::F64(4.0),
            TypedValue::Bool(true),
            TypedValue::String("two".into()),
            TypedValue::I32(1),
        ]
    );
}

#[test]
fn test_argument_list_releases_string_handles() {
    let strings = StringTable::new();
    let buffer = encode_arguments(&strings, &[ManagedValue::String("owned".into())]).unwrap();
    assert_eq!(strings.len(), 1);
    {
        let _args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
    }
    assert!(strings.is_empty());
}

#[test]
fn test_rejected_buffer_releases_its_strings() {
    let strings = StringTable::new();
    let mut buffer = encode_arguments(
        &strings,
        &[ManagedValue::String("a".into()), ManagedValue::Integer(3)],
    )
    .unwrap();
    buffer.push(0);
    assert_eq!(strings.len(), 1);

    let err = ArgumentList::decode(Some(&buffer), &strings).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArgumentBuffer { length: 33, .. }));
    assert!(strings.is_empty());
}

#[test]
fn test_release_slot_strings_only_touches_live_handles() {
    let strings = StringTable::new();
    let kept = strings.allocate("kept");
    let buffer = encode_arguments(
        &strings,
        &[ManagedValue::String("x".into()), ManagedValue::String("y".into())],
    )
    .unwrap();
    let stale = Slot::with_payload(VarType::BSTR, &999u64.to_le_bytes());
    let mut with_stale = buffer.clone();
    with_stale.extend_from_slice(stale.as_bytes());

    assert_eq!(release_slot_strings(Some(&with_stale), &strings), 2);
    assert_eq!(release_slot_strings(Some(&buffer), &strings), 0);
    assert_eq!(release_slot_strings(None, &strings), 0);
    assert_eq!(strings.resolve(kept).as_deref(), Some("kept"));
}

#[test]
fn test_encode_rejects_arrays_and_objects() {
    let strings = StringTable::new();
    let err = encode_arguments(
        &strings,
        &[
            ManagedValue::String("leaked?".into()),
            ManagedValue::Array(vec![ManagedValue::Integer(1)]),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, EncodeError::ArrayUnsupported { .. }));
    // The abandoned builder gave back its strings
    assert!(strings.is_empty());

    let mut builder = ArgumentBuilder::new(&strings);
    let err = builder.push(&ManagedValue::Object("java.util.Date".into())).err();
    assert_eq!(
        err,
        Some(EncodeError::UnsupportedType {
            type_name: "java.util.Date".into()
        })
    );
}

#[test]
fn test_encode_byte_and_character() {
    let strings = StringTable::new();
    let buffer =
        encode_arguments(&strings, &[ManagedValue::Byte(-1), ManagedValue::Character('A')]).unwrap();
    let args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
    assert_eq!(args.typed_value(0), Some(Ok(TypedValue::U8(b'A'))));
    assert_eq!(args.typed_value(1), Some(Ok(TypedValue::U8(0xFF))));
}

proptest! {
    #[test]
    fn prop_decode_yields_k_slots_in_order(values in proptest::collection::vec(any::<i32>(), 0..32)) {
        let strings = StringTable::new();
        let mut buffer = Vec::new();
        for v in &values {
            buffer.extend_from_slice(Slot::with_payload(VarType::I4, &v.to_le_bytes()).as_bytes());
        }
        let args = ArgumentList::decode(Some(&buffer), &strings).unwrap();
        prop_assert_eq!(args.len(), values.len());
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(args.typed_value(i), Some(Ok(TypedValue::I32(*v))));
        }
    }

    #[test]
    fn prop_decode_rejects_non_multiples(len in 0usize..256) {
        prop_assume!(len % SLOT_SIZE != 0);
        let strings = StringTable::new();
        let buffer = vec![0u8; len];
        let rejected = matches!(
            ArgumentList::decode(Some(&buffer), &strings),
            Err(BridgeError::InvalidArgumentBuffer { .. })
        );
        prop_assert!(rejected);
    }

    #[test]
    fn prop_integer_conversion_round_trips(v in any::<i32>(), w in any::<i16>(), x in any::<i64>()) {
        prop_assert_eq!(object(TypedValue::I32(v)), ManagedValue::Integer(v));
        prop_assert_eq!(object(TypedValue::I16(w)), ManagedValue::Short(w));
        prop_assert_eq!(object(TypedValue::I64(x)), ManagedValue::Long(x));
        prop_assert_eq!(
            convert_legacy(TypedValue::I64(x)).unwrap(),
            Conversion::Object(ManagedValue::Long(i64::from(x as i32)))
        );
    }

    #[test]
    fn prop_double_conversion_round_trips(v in any::<f64>().prop_filter("nan", |v| !v.is_nan())) {
        prop_assert_eq!(object(TypedValue::F64(v)), ManagedValue::Double(v));
    }
}
