use latebind::dispatch::registry::RuntimeEvent;
use latebind::dispatch::ApartmentModel;
use latebind::{
    Bridge, BridgeConfig, BridgeError, ClassId, Conversion, DiagnosticLevel, DispatchTable,
    EventLevel, Fault, Hresult, InProcessRuntime, ManagedValue, ModuleIdentity, Slot,
    TypedValue, ValueHost, VarType,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const SHEET: ClassId = ClassId::new(0x00024500, 0x0000, 0x0000, [0xC0, 0, 0, 0, 0, 0, 0, 0x46]);

fn sheet() -> DispatchTable {
    DispatchTable::new()
        .method("Sum", |args| {
            let mut total = 0i32;
            for (i, value) in args.iter().enumerate() {
                match value {
                    TypedValue::I32(n) => total += n,
                    TypedValue::I16(n) => total += i32::from(*n),
                    _ => return Err(Fault::type_mismatch(i)),
                }
            }
            Ok(TypedValue::I32(total))
        })
        .method("Concat", |args| {
            let mut out = String::new();
            for value in args {
                if let TypedValue::String(s) = value {
                    out.push_str(s);
                }
            }
            Ok(TypedValue::String(out))
        })
        .method("Raise", |_| Err(Fault::exception(5, "Foo", "bar")))
        .method("Selection", |_| Ok(TypedValue::ByRefArray))
        .method("Nested", |_| Ok(TypedValue::VariantRef(Box::new(TypedValue::ByRefArray))))
        .method("Big", |_| Ok(TypedValue::I64(0x1_0000_0005)))
        .method("Clear", |_| Ok(TypedValue::Empty))
        .method("Crash", |_| panic!("member blew up"))
        .property("Title", TypedValue::String("Sheet1".into()))
}

fn setup(config: BridgeConfig) -> (Bridge<Arc<InProcessRuntime>>, Arc<InProcessRuntime>) {
    let runtime = Arc::new(InProcessRuntime::new());
    runtime.register("Test.Sheet", SHEET, sheet);
    let bridge = Bridge::new(Arc::clone(&runtime), &config, ModuleIdentity::new("scenarios"));
    (bridge, runtime)
}

fn bridge() -> (Bridge<Arc<InProcessRuntime>>, Arc<InProcessRuntime>) {
    setup(BridgeConfig::default())
}

#[test]
fn test_method_with_arguments() {
    let (bridge, runtime) = bridge();
    let host = ValueHost::new();
    let args = bridge
        .encode_arguments(&[ManagedValue::Integer(40), ManagedValue::Short(2)])
        .unwrap();

    let result = bridge
        .invoke(&host, "MULTITHREADED", "Test.Sheet", "Sum", Some(&args))
        .unwrap();
    assert_eq!(result, Some(ManagedValue::Integer(42)));
    assert_eq!(runtime.live_objects(), 0);
}

#[test]
fn test_string_handles_released_after_call() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();
    let args = bridge
        .encode_arguments(&[ManagedValue::String("ab".into()), ManagedValue::String("cd".into())])
        .unwrap();
    assert_eq!(bridge.strings().len(), 2);

    let result = bridge
        .invoke(&host, "MULTITHREADED", "Test.Sheet", "Concat", Some(&args))
        .unwrap();
    assert_eq!(result, Some(ManagedValue::String("abcd".into())));
    assert!(bridge.strings().is_empty());
}

#[test]
fn test_member_not_found_releases_object() {
    let (bridge, runtime) = bridge();
    bridge.set_diagnostic_level(DiagnosticLevel::WARNING.0 as i16);
    let host = ValueHost::new();

    let err = bridge
        .invoke(&host, "MULTITHREADED", "Test.Sheet", "DoesNotExist", None)
        .unwrap_err();
    assert_eq!(err.message, "Failed to get member id for DoesNotExist");
    assert_eq!(
        host.log_lines(),
        vec![(EventLevel::Warning, "Failed to get member id for DoesNotExist".to_string())]
    );

    assert_eq!(runtime.live_objects(), 0);
    assert_eq!(
        runtime.events(),
        vec![
            RuntimeEvent::Initialize(ApartmentModel::Multithreaded),
            RuntimeEvent::Activate(SHEET),
            RuntimeEvent::Release(SHEET),
            RuntimeEvent::Uninitialize,
        ]
    );
}

#[test]
fn test_native_exception_carried_unchanged() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Raise", None)
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::NativeException {
            member: "Raise".into(),
            code: 5,
            source_text: "Foo".into(),
            description: "bar".into(),
        }
    );

    let raised = bridge
        .invoke(&host, "MULTITHREADED", "Test.Sheet", "Raise", None)
        .unwrap_err();
    assert!(raised.message.contains("Raise"));
    assert!(raised.message.contains("error 5"));
    assert!(raised.message.contains("Foo"));
    assert!(raised.message.contains("bar"));
}

#[test]
fn test_by_reference_array_result_is_rejected() {
    let (bridge, runtime) = bridge();
    let host = ValueHost::new();

    for member in ["Selection", "Nested"] {
        let err = bridge
            .try_invoke(&host, "MULTITHREADED", "Test.Sheet", member, None)
            .unwrap_err();
        match err {
            BridgeError::ResultConversionFailed { status, identity, .. } => {
                assert_eq!(status, Hresult::DISP_E_BADVARTYPE);
                assert_eq!(identity, "Test.Sheet");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    let raised = bridge
        .invoke(&host, "MULTITHREADED", "Test.Sheet", "Selection", None)
        .unwrap_err();
    assert_eq!(
        raised.message,
        "Failed to convert return value, variant type:0x600c, Object:Test.Sheet, Method:Selection"
    );
    assert_eq!(runtime.live_objects(), 0);
}

#[test]
fn test_session_modes_tear_down_their_family() {
    let (bridge, runtime) = bridge();
    let host = ValueHost::new();

    bridge
        .invoke(&host, "SINGLEAPARTMENTTHREADED", "Test.Sheet", "Clear", None)
        .unwrap();
    bridge
        .invoke(&host, "APARTMENTTHREADED", "Test.Sheet", "Clear", None)
        .unwrap();
    bridge
        .invoke(&host, "whatever", "Test.Sheet", "Clear", None)
        .unwrap();

    let inits: Vec<RuntimeEvent> = runtime
        .events()
        .into_iter()
        .filter(|e| !matches!(e, RuntimeEvent::Activate(_) | RuntimeEvent::Release(_)))
        .collect();
    assert_eq!(
        inits,
        vec![
            RuntimeEvent::OleInitialize,
            RuntimeEvent::OleUninitialize,
            RuntimeEvent::Initialize(ApartmentModel::ApartmentThreaded),
            RuntimeEvent::Uninitialize,
            RuntimeEvent::Initialize(ApartmentModel::Multithreaded),
            RuntimeEvent::Uninitialize,
        ]
    );
}

#[test]
fn test_initialization_failure() {
    let (bridge, runtime) = bridge();
    runtime.fail_initialization_with(Some(Hresult::E_OUTOFMEMORY));
    let host = ValueHost::new();

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Clear", None)
        .unwrap_err();
    assert_eq!(err, BridgeError::InitializationFailed { status: Hresult::E_OUTOFMEMORY });

    let raised = bridge
        .invoke(&host, "MULTITHREADED", "Test.Sheet", "Clear", None)
        .unwrap_err();
    assert_eq!(raised.message, "Session initialize failed hr= 0x8007000e");
    assert!(runtime.events().is_empty());
}

#[test]
fn test_panic_becomes_unexpected_failure_with_teardown() {
    let (bridge, runtime) = bridge();
    let host = ValueHost::new();

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Crash", None)
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::UnexpectedFailure { detail: "member blew up".into() }
    );
    assert_eq!(runtime.live_objects(), 0);
    assert_eq!(runtime.events().last(), Some(&RuntimeEvent::Uninitialize));

    // Thread is usable again afterwards
    let ok = bridge.invoke(&host, "APARTMENTTHREADED", "Test.Sheet", "Clear", None);
    assert_eq!(ok, Ok(None));
}

#[test]
fn test_property_get_and_set() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();

    // Each call activates a fresh instance, so the put is not observable later
    let args = bridge.encode_arguments(&[ManagedValue::String("Budget".into())]).unwrap();
    let put = bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "set_Title", Some(&args));
    assert_eq!(put, Ok(None));

    let title = bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "get_Title", None);
    assert_eq!(title, Ok(Some(ManagedValue::String("Sheet1".into()))));
}

#[test]
fn test_argument_mismatch_reports_position() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();
    let args = bridge
        .encode_arguments(&[
            ManagedValue::Integer(1),
            ManagedValue::Integer(2),
            ManagedValue::Double(3.5),
        ])
        .unwrap();

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Sum", Some(&args))
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::ArgumentMismatch {
            member: "Sum".into(),
            status: Hresult::DISP_E_TYPEMISMATCH,
            index: 3,
        }
    );
}

#[test]
fn test_by_reference_array_argument_is_rejected() {
    let (bridge, runtime) = bridge();
    let host = ValueHost::new();
    let array = Slot::with_payload(VarType(VarType::BYREF | VarType::ARRAY | VarType::I4.0), &[]);
    let first = Slot::with_payload(VarType::I4, &1i32.to_le_bytes());

    // Buffer order: the last declared argument comes first
    let mut buffer = Vec::new();
    buffer.extend_from_slice(array.as_bytes());
    buffer.extend_from_slice(first.as_bytes());

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Sum", Some(&buffer))
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::ArgumentMismatch {
            member: "Sum".into(),
            status: Hresult::DISP_E_BADVARTYPE,
            index: 2,
        }
    );
    assert_eq!(runtime.live_objects(), 0);
}

#[test]
fn test_strings_released_when_initialization_fails() {
    let (bridge, runtime) = bridge();
    runtime.fail_initialization_with(Some(Hresult::E_FAIL));
    let host = ValueHost::new();
    let args = bridge
        .encode_arguments(&[ManagedValue::String("lost".into()), ManagedValue::Integer(1)])
        .unwrap();
    assert_eq!(bridge.strings().len(), 1);

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Concat", Some(&args))
        .unwrap_err();
    assert_eq!(err, BridgeError::InitializationFailed { status: Hresult::E_FAIL });
    assert!(bridge.strings().is_empty());
}

#[test]
fn test_strings_released_when_buffer_is_rejected() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();
    let mut args = bridge.encode_string_handle("partial").to_vec();
    args.push(0);

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Concat", Some(&args))
        .unwrap_err();
    assert_eq!(err, BridgeError::InvalidArgumentBuffer { length: 17, slot_size: 16 });
    assert!(bridge.strings().is_empty());
}

#[test]
fn test_string_slot_is_single_use() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();
    let args = bridge.encode_string_handle("once");

    let first = bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "Concat", Some(&args));
    assert_eq!(first, Ok(Some(ManagedValue::String("once".into()))));

    let second = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Concat", Some(&args))
        .unwrap_err();
    assert_eq!(
        second,
        BridgeError::ArgumentMismatch {
            member: "Concat".into(),
            status: Hresult::E_INVALIDARG,
            index: 1,
        }
    );
}

#[test]
fn test_invalid_buffer_is_rejected_after_session() {
    let (bridge, runtime) = bridge();
    let host = ValueHost::new();

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Sheet", "Clear", Some(&[0u8; 20]))
        .unwrap_err();
    assert_eq!(err, BridgeError::InvalidArgumentBuffer { length: 20, slot_size: 16 });
    assert_eq!(
        runtime.events(),
        vec![
            RuntimeEvent::Initialize(ApartmentModel::Multithreaded),
            RuntimeEvent::Uninitialize
        ]
    );
}

#[test]
fn test_class_identity_forms() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();

    let literal = SHEET.to_string();
    let result = bridge.try_invoke(&host, "MULTITHREADED", &literal, "Clear", None);
    assert_eq!(result, Ok(Conversion::Nothing));

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "{not-a-guid}", "Clear", None)
        .unwrap_err();
    assert_eq!(err.status(), Some(Hresult::CO_E_CLASSSTRING));

    let err = bridge
        .try_invoke(&host, "MULTITHREADED", "Test.Missing", "Clear", None)
        .unwrap_err();
    assert!(matches!(err, BridgeError::ClassResolutionFailed { .. }));

    let unregistered = ClassId::new(1, 2, 3, [0; 8]).to_string();
    let err = bridge
        .try_invoke(&host, "MULTITHREADED", &unregistered, "Clear", None)
        .unwrap_err();
    assert_eq!(
        err,
        BridgeError::ActivationFailed {
            identity: unregistered.clone(),
            status: Hresult::REGDB_E_CLASSNOTREG,
        }
    );
}

#[test]
fn test_int64_policy() {
    let host = ValueHost::new();

    let (full, _) = bridge();
    let value = full.invoke(&host, "MULTITHREADED", "Test.Sheet", "Big", None);
    assert_eq!(value, Ok(Some(ManagedValue::Long(0x1_0000_0005))));

    let legacy = BridgeConfig::parse("[dispatch]\nint64_policy = \"legacy32\"\n").unwrap();
    let (legacy, _) = setup(legacy);
    let value = legacy.invoke(&host, "MULTITHREADED", "Test.Sheet", "Big", None);
    assert_eq!(value, Ok(Some(ManagedValue::Long(5))));
}

#[test]
fn test_default_level_logs_success_only() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();

    bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "Clear", None).unwrap();
    let lines = host.log_lines();
    assert!(lines.iter().all(|(level, _)| *level == EventLevel::Success));
    assert_eq!(lines.first().map(|(_, text)| text.as_str()), Some("In module:scenarios"));
    assert_eq!(
        lines.last().map(|(_, text)| text.as_str()),
        Some("Success! Return back to caller.")
    );

    host.clear_log();
    let _ = bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "DoesNotExist", None);
    assert!(host.log_lines().iter().all(|(level, _)| *level != EventLevel::Warning));
}

#[test]
fn test_set_diagnostic_level_is_idempotent() {
    let (bridge, _runtime) = bridge();
    let host = ValueHost::new();

    bridge.set_diagnostic_level(0x1111);
    bridge.set_diagnostic_level(0x1111);
    bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "Clear", None).unwrap();
    assert!(host
        .log_lines()
        .iter()
        .any(|(level, text)| *level == EventLevel::Information
            && text == "Progid is:Test.Sheet, member to execute is:Clear"));

    bridge.set_diagnostic_level(0);
    host.clear_log();
    bridge.invoke(&host, "MULTITHREADED", "Test.Sheet", "Clear", None).unwrap();
    assert!(host.log_lines().is_empty());
}

#[test]
fn test_concurrent_calls() {
    let (bridge, runtime) = bridge();
    let bridge = Arc::new(bridge);
    let failed = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            let failed = Arc::clone(&failed);
            std::thread::spawn(move || {
                let host = ValueHost::new();
                let args = bridge
                    .encode_arguments(&[ManagedValue::Integer(i), ManagedValue::Integer(1)])
                    .unwrap();
                let model = if i % 2 == 0 { "MULTITHREADED" } else { "APARTMENTTHREADED" };
                let result = bridge.invoke(&host, model, "Test.Sheet", "Sum", Some(&args));
                if result != Ok(Some(ManagedValue::Integer(i + 1))) {
                    failed.store(true, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!failed.load(Ordering::SeqCst));
    assert_eq!(runtime.live_objects(), 0);
    assert!(bridge.strings().is_empty());
}
