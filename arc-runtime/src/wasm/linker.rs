//! Embeds [`Bindings`] into a wasmtime instance.
//!
//! Every binding is registered under the `env` module. Scalar parameters
//! narrower than 32 bits travel as `i32`/`u32` on the sandbox boundary;
//! strings travel as `(ptr, len)` pairs through guest linear memory.

use std::sync::Arc;

use arc_types::errors::BoxedError;
use arc_types::parking_lot::Mutex;
use wasmtime::{Caller, Engine, Extern, Instance, Linker, Store};

use crate::errors::RuntimeError;
use crate::node::Node;
use crate::state::SharedState;
use crate::wasm::Bindings;

pub(crate) struct Host {
    bindings: Bindings,
}

fn read_guest_string(caller: &mut Caller<'_, Host>, ptr: u32, len: u32) -> String {
    let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
        return String::new();
    };
    let data = memory.data(&caller);
    let start = ptr as usize;
    let end = start.saturating_add(len as usize);
    data.get(start..end)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default()
}

fn write_guest_bytes(caller: &mut Caller<'_, Host>, ptr: u32, cap: u32, bytes: &[u8]) -> u32 {
    let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
        return 0;
    };
    let count = bytes.len().min(cap as usize);
    let start = ptr as usize;
    let Some(end) = start.checked_add(count) else {
        return 0;
    };
    let data = memory.data_mut(caller);
    let Some(target) = data.get_mut(start..end) else {
        return 0;
    };
    target.copy_from_slice(&bytes[..count]);
    count as u32
}

macro_rules! link_numeric {
    ($linker:expr, $($t:ty => $w:ty),* $(,)?) => {
        $(
            paste::paste! {
                $linker.func_wrap(
                    "env",
                    concat!("series_create_empty_", stringify!($t)),
                    |caller: Caller<'_, Host>, len: u32| -> u32 {
                        caller.data().bindings.[<series_create_empty_ $t>](len)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_index_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, index: u32| -> $w {
                        caller.data().bindings.[<series_index_ $t>](handle, index) as $w
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_set_element_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, index: u32, value: $w| {
                        caller.data().bindings.[<series_set_element_ $t>](handle, index, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_add_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_element_add_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_sub_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_element_sub_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_mul_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_element_mul_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_div_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_element_div_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_mod_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_element_mod_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_rsub_", stringify!($t)),
                    |caller: Caller<'_, Host>, value: $w, handle: u32| -> u32 {
                        caller.data().bindings.[<series_element_rsub_ $t>](value as $t, handle)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_element_rdiv_", stringify!($t)),
                    |caller: Caller<'_, Host>, value: $w, handle: u32| -> u32 {
                        caller.data().bindings.[<series_element_rdiv_ $t>](value as $t, handle)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_series_add_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_series_add_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_series_sub_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_series_sub_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_series_mul_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_series_mul_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_series_div_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_series_div_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_series_mod_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_series_mod_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_eq_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_compare_eq_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_ne_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_compare_ne_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_lt_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_compare_lt_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_le_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_compare_le_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_gt_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_compare_gt_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_ge_", stringify!($t)),
                    |caller: Caller<'_, Host>, a: u32, b: u32| -> Result<u32, wasmtime::Error> {
                        caller.data().bindings.[<series_compare_ge_ $t>](a, b).map_err(Into::into)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_eq_scalar_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_compare_eq_scalar_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_ne_scalar_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_compare_ne_scalar_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_lt_scalar_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_compare_lt_scalar_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_le_scalar_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_compare_le_scalar_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_gt_scalar_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_compare_gt_scalar_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("series_compare_ge_scalar_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32, value: $w| -> u32 {
                        caller.data().bindings.[<series_compare_ge_scalar_ $t>](handle, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("channel_read_", stringify!($t)),
                    |caller: Caller<'_, Host>, key: u32| -> $w {
                        caller.data().bindings.[<channel_read_ $t>](key) as $w
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("channel_write_", stringify!($t)),
                    |caller: Caller<'_, Host>, key: u32, value: $w| {
                        caller.data().bindings.[<channel_write_ $t>](key, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("state_load_", stringify!($t)),
                    |caller: Caller<'_, Host>, slot: u32, init: $w| -> $w {
                        caller.data().bindings.[<state_load_ $t>](slot, init as $t) as $w
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("state_store_", stringify!($t)),
                    |caller: Caller<'_, Host>, slot: u32, value: $w| {
                        caller.data().bindings.[<state_store_ $t>](slot, value as $t)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("state_load_series_", stringify!($t)),
                    |caller: Caller<'_, Host>, slot: u32, init: u32| -> u32 {
                        caller.data().bindings.[<state_load_series_ $t>](slot, init)
                    },
                )?;
                $linker.func_wrap(
                    "env",
                    concat!("state_store_series_", stringify!($t)),
                    |caller: Caller<'_, Host>, slot: u32, handle: u32| {
                        caller.data().bindings.[<state_store_series_ $t>](slot, handle)
                    },
                )?;
            }
        )*
    };
}

macro_rules! link_negate {
    ($linker:expr, $($t:ty),* $(,)?) => {
        $(
            paste::paste! {
                $linker.func_wrap(
                    "env",
                    concat!("series_negate_", stringify!($t)),
                    |caller: Caller<'_, Host>, handle: u32| -> u32 {
                        caller.data().bindings.[<series_negate_ $t>](handle)
                    },
                )?;
            }
        )*
    };
}

fn register(linker: &mut Linker<Host>) -> Result<(), wasmtime::Error> {
    link_numeric!(
        linker,
        u8 => u32,
        u16 => u32,
        u32 => u32,
        u64 => u64,
        i8 => i32,
        i16 => i32,
        i32 => i32,
        i64 => i64,
        f32 => f32,
        f64 => f64,
    );
    link_negate!(linker, i8, i16, i32, i64, f32, f64);

    linker.func_wrap(
        "env",
        "series_len",
        |caller: Caller<'_, Host>, handle: u32| -> u32 { caller.data().bindings.series_len(handle) },
    )?;
    linker.func_wrap(
        "env",
        "series_slice",
        |caller: Caller<'_, Host>, handle: u32, start: u32, end: u32| -> u32 {
            caller.data().bindings.series_slice(handle, start, end)
        },
    )?;
    linker.func_wrap(
        "env",
        "series_not_u8",
        |caller: Caller<'_, Host>, handle: u32| -> u32 {
            caller.data().bindings.series_not_u8(handle)
        },
    )?;

    linker.func_wrap(
        "env",
        "string_create",
        |mut caller: Caller<'_, Host>, ptr: u32, len: u32| -> u32 {
            let value = read_guest_string(&mut caller, ptr, len);
            caller.data().bindings.string_create(&value)
        },
    )?;
    linker.func_wrap(
        "env",
        "string_read",
        |mut caller: Caller<'_, Host>, handle: u32, ptr: u32, cap: u32| -> u32 {
            let value = caller.data().bindings.string_get(handle);
            write_guest_bytes(&mut caller, ptr, cap, value.as_bytes())
        },
    )?;
    linker.func_wrap(
        "env",
        "string_len",
        |caller: Caller<'_, Host>, handle: u32| -> u32 { caller.data().bindings.string_len(handle) },
    )?;
    linker.func_wrap(
        "env",
        "string_equal",
        |caller: Caller<'_, Host>, a: u32, b: u32| -> u32 {
            caller.data().bindings.string_equal(a, b)
        },
    )?;
    linker.func_wrap(
        "env",
        "string_concat",
        |caller: Caller<'_, Host>, a: u32, b: u32| -> u32 {
            caller.data().bindings.string_concat(a, b)
        },
    )?;
    linker.func_wrap(
        "env",
        "state_load_str",
        |caller: Caller<'_, Host>, slot: u32, init: u32| -> u32 {
            caller.data().bindings.state_load_str(slot, init)
        },
    )?;
    linker.func_wrap(
        "env",
        "state_store_str",
        |caller: Caller<'_, Host>, slot: u32, handle: u32| {
            caller.data().bindings.state_store_str(slot, handle)
        },
    )?;
    linker.func_wrap(
        "env",
        "channel_read_str",
        |caller: Caller<'_, Host>, key: u32| -> u32 {
            caller.data().bindings.channel_read_str(key)
        },
    )?;
    linker.func_wrap(
        "env",
        "channel_write_str",
        |caller: Caller<'_, Host>, key: u32, handle: u32| {
            caller.data().bindings.channel_write_str(key, handle)
        },
    )?;
    linker.func_wrap(
        "env",
        "panic",
        |mut caller: Caller<'_, Host>, ptr: u32, len: u32| -> Result<(), wasmtime::Error> {
            let message = read_guest_string(&mut caller, ptr, len);
            caller.data().bindings.panic(&message);
            Err(RuntimeError::WasmPanic(message).into())
        },
    )?;
    Ok(())
}

/// One loaded Arc module: an engine, the instantiated guest, and the host
/// context its imports resolve against.
pub struct Sandbox {
    store: Store<Host>,
    instance: Instance,
}

impl Sandbox {
    /// Compiles and instantiates the module. Failure here is fatal to
    /// startup; the runtime never reaches its running state on a bad module.
    pub fn load(wasm: &[u8], bindings: Bindings) -> Result<Self, RuntimeError> {
        let engine = Engine::default();
        let module = wasmtime::Module::new(&engine, wasm)
            .map_err(|e| RuntimeError::ModuleLoad(e.into()))?;
        let mut linker = Linker::new(&engine);
        register(&mut linker).map_err(|e| RuntimeError::ModuleLoad(e.into()))?;
        let mut store = Store::new(&engine, Host { bindings });
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| RuntimeError::ModuleLoad(e.into()))?;
        Ok(Self { store, instance })
    }

    /// Calls a nullary export. A trap (guest panic, length-mismatch fault)
    /// fails this invocation only.
    ///
    /// Every `WasmPanic` returned here has already gone through the error
    /// handler exactly once: the panic hook reports before forcing its
    /// trap, and raw traps (unreachable, memory faults) are reported on
    /// the spot.
    pub fn invoke(&mut self, export: &str) -> Result<(), RuntimeError> {
        let func = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, export)
            .map_err(|_| RuntimeError::MissingExport(export.to_string()))?;
        match func.call(&mut self.store, ()) {
            Ok(()) => Ok(()),
            Err(trap) => Err(match trap.downcast::<RuntimeError>() {
                Ok(err) => err,
                Err(raw) => {
                    let err = RuntimeError::WasmPanic(raw.to_string());
                    self.store.data().bindings.report(&err);
                    err
                }
            }),
        }
    }

    pub fn has_export(&mut self, export: &str) -> bool {
        self.instance.get_func(&mut self.store, export).is_some()
    }
}

/// A scheduler node whose body is one export of a shared [`Sandbox`].
pub struct WasmNode {
    sandbox: Arc<Mutex<Sandbox>>,
    export: String,
}

impl WasmNode {
    pub fn new(sandbox: Arc<Mutex<Sandbox>>, export: String) -> Self {
        Self { sandbox, export }
    }
}

impl Node for WasmNode {
    fn run(&mut self, _state: &SharedState) -> Result<(), BoxedError> {
        match self.sandbox.lock().invoke(&self.export) {
            Ok(()) => Ok(()),
            // A `WasmPanic` leaving `invoke` has already been reported;
            // surfacing it again here would hand the handler the same
            // fault a second time through the node-failure path.
            Err(RuntimeError::WasmPanic(_)) => Ok(()),
            Err(e) => Err(Box::new(e)),
        }
    }
}
