use std::collections::HashMap;
use std::sync::Arc;

use arc_types::errors::ErrorKind;
use arc_types::ir::{Ir, Node as IrNode};
use arc_types::parking_lot::Mutex;
use arc_types::telem::{DataType, Frame, Series};

use crate::error_manager::ErrorManager;
use crate::errors::{noop_handler, RuntimeError};
use crate::node::Node;
use crate::scheduler::Scheduler;
use crate::state::{Config, SharedState, State};
use crate::testutil::error_log;
use crate::wasm::{Bindings, Sandbox, WasmNode};

const EXPLODER_WAT: &str = r#"
(module
  (import "env" "panic" (func $panic (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 8) "sensor out of range")
  (func (export "exploder")
    (call $panic (i32.const 8) (i32.const 19))))
"#;

fn load(wat: &str, bindings: Bindings) -> Sandbox {
    let wasm = wat::parse_str(wat).unwrap();
    Sandbox::load(&wasm, bindings).unwrap()
}

fn attached_bindings() -> (SharedState, Bindings) {
    let state = State::shared(Config::default()).unwrap();
    let bindings = Bindings::new(
        Some(state.clone()),
        Arc::new(ErrorManager::new(noop_handler())),
    );
    (state, bindings)
}

#[test]
fn guest_reads_and_writes_channels() {
    let (state, bindings) = attached_bindings();
    {
        let mut st = state.lock();
        st.register_channel(10, DataType::F64);
        st.ingest(Frame::single(10, Series::from_vec(vec![21.0f64])));
    }

    let mut sandbox = load(
        r#"
        (module
          (import "env" "channel_read_f64" (func $read (param i32) (result f64)))
          (import "env" "channel_write_f64" (func $write (param i32 f64)))
          (func (export "doubler")
            i32.const 20
            i32.const 10
            call $read
            f64.const 2
            f64.mul
            call $write))
        "#,
        bindings,
    );

    sandbox.invoke("doubler").unwrap();

    let writes = state.lock().flush();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, 20);
    assert_eq!(writes[0].1.at::<f64>(0), Some(42.0));
}

#[test]
fn guest_builds_series_through_the_arena() {
    let (state, bindings) = attached_bindings();
    let mut sandbox = load(
        r#"
        (module
          (import "env" "series_create_empty_f64" (func $create (param i32) (result i32)))
          (import "env" "series_set_element_f64" (func $set (param i32 i32 f64)))
          (import "env" "series_element_add_f64" (func $add (param i32 f64) (result i32)))
          (import "env" "state_store_series_f64" (func $store (param i32 i32)))
          (func (export "accumulate")
            (local $h i32)
            (local.set $h (call $create (i32.const 2)))
            (call $set (local.get $h) (i32.const 0) (f64.const 1.5))
            (call $set (local.get $h) (i32.const 1) (f64.const 2.5))
            (call $store (i32.const 1) (call $add (local.get $h) (f64.const 10)))))
        "#,
        bindings.clone(),
    );

    state.lock().set_current_node("accumulator");
    sandbox.invoke("accumulate").unwrap();
    state.lock().flush();

    state.lock().set_current_node("accumulator");
    let dummy = bindings.series_create_empty_f64(1);
    let kept = bindings.state_load_series_f64(1, dummy);
    assert_eq!(bindings.series_len(kept), 2);
    assert_eq!(bindings.series_index_f64(kept, 0), 11.5);
    assert_eq!(bindings.series_index_f64(kept, 1), 12.5);
}

#[test]
fn length_mismatch_traps_the_guest() {
    let (_state, bindings) = attached_bindings();
    let mut sandbox = load(
        r#"
        (module
          (import "env" "series_create_empty_f64" (func $create (param i32) (result i32)))
          (import "env" "series_series_add_f64" (func $add (param i32 i32) (result i32)))
          (func (export "mismatch")
            (drop (call $add (call $create (i32.const 3)) (call $create (i32.const 2))))))
        "#,
        bindings,
    );

    let err = sandbox.invoke("mismatch").unwrap_err();
    assert!(err.to_string().contains("length mismatch"));
}

#[test]
fn guest_panic_reports_and_aborts_the_call() {
    let (handler, log) = error_log();
    let bindings = Bindings::new(
        Some(State::shared(Config::default()).unwrap()),
        Arc::new(ErrorManager::new(handler)),
    );
    let mut sandbox = load(EXPLODER_WAT, bindings);

    assert!(sandbox.invoke("exploder").is_err());
    assert_eq!(log.count_of(ErrorKind::WasmPanic), 1);
    assert!(log
        .messages()
        .iter()
        .any(|m| m.contains("sensor out of range")));
}

#[test]
fn guest_panic_reports_once_through_the_scheduler() {
    let (handler, log) = error_log();
    let errors = Arc::new(ErrorManager::new(handler));
    let ir = Ir {
        nodes: vec![IrNode {
            key: "exploder".into(),
            ..Default::default()
        }],
        edges: vec![],
    };
    let state = State::shared(Config {
        ir: ir.clone(),
        channels: vec![],
    })
    .unwrap();

    // The same wiring `Runtime::build_scheduler` produces: bindings and
    // scheduler sharing one error manager.
    let bindings = Bindings::new(Some(state.clone()), errors.clone());
    let wasm = wat::parse_str(EXPLODER_WAT).unwrap();
    let sandbox = Arc::new(Mutex::new(Sandbox::load(&wasm, bindings).unwrap()));
    let mut impls: HashMap<String, Box<dyn Node>> = HashMap::new();
    impls.insert(
        "exploder".into(),
        Box::new(WasmNode::new(sandbox, "exploder".into())),
    );
    let mut scheduler = Scheduler::new(&ir, impls).unwrap();

    scheduler.tick(&state, &errors);

    assert_eq!(log.len(), 1);
    assert_eq!(log.kinds(), vec![Some(ErrorKind::WasmPanic)]);
    assert!(log
        .messages()
        .iter()
        .any(|m| m.contains("sensor out of range")));

    // The node fired on its first tick; later ticks stay quiet.
    scheduler.tick(&state, &errors);
    assert_eq!(log.len(), 1);
}

#[test]
fn raw_trap_reports_once_as_a_panic() {
    let (handler, log) = error_log();
    let bindings = Bindings::new(
        Some(State::shared(Config::default()).unwrap()),
        Arc::new(ErrorManager::new(handler)),
    );
    let mut sandbox = load(
        r#"(module (func (export "crash") unreachable))"#,
        bindings,
    );

    let err = sandbox.invoke("crash").unwrap_err();
    assert!(matches!(err, RuntimeError::WasmPanic(_)));
    assert_eq!(log.count_of(ErrorKind::WasmPanic), 1);
}

#[test]
fn guest_strings_cross_linear_memory() {
    let (_state, bindings) = attached_bindings();
    let probe = bindings.clone();
    let mut sandbox = load(
        r#"
        (module
          (import "env" "string_create" (func $create (param i32 i32) (result i32)))
          (import "env" "state_store_str" (func $store (param i32 i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "valve_open")
          (func (export "tag")
            (call $store (i32.const 4) (call $create (i32.const 16) (i32.const 10)))))
        "#,
        bindings,
    );

    sandbox.invoke("tag").unwrap();

    let dummy = probe.string_create("dummy");
    let loaded = probe.state_load_str(4, dummy);
    assert_eq!(probe.string_get(loaded), "valve_open");
}

#[test]
fn missing_export_is_reported_as_such() {
    let (_state, bindings) = attached_bindings();
    let mut sandbox = load("(module)", bindings);
    assert!(matches!(
        sandbox.invoke("ghost"),
        Err(RuntimeError::MissingExport(_))
    ));
}

#[test]
fn invalid_module_bytes_fail_to_load() {
    let (_state, bindings) = attached_bindings();
    assert!(matches!(
        Sandbox::load(b"not wasm at all", bindings),
        Err(RuntimeError::ModuleLoad(_))
    ));
}
