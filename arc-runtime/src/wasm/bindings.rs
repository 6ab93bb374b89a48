use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_types::log::warn;
use arc_types::telem::{ChannelKey, DataType, Sample, SampleValue, Series, TimeStamp};

use crate::error_manager::ErrorManager;
use crate::errors::RuntimeError;
use crate::state::{SharedState, State};

/// Per-element arithmetic for the binding surface. Integer types wrap;
/// division and remainder report an absent result instead of faulting, which
/// the callers turn into handle `0`.
pub(crate) trait Arith: Sample {
    fn add(a: Self, b: Self) -> Self;
    fn sub(a: Self, b: Self) -> Self;
    fn mul(a: Self, b: Self) -> Self;
    fn div(a: Self, b: Self) -> Option<Self>;
    fn rem(a: Self, b: Self) -> Option<Self>;
}

macro_rules! arith_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl Arith for $t {
                fn add(a: Self, b: Self) -> Self {
                    a.wrapping_add(b)
                }
                fn sub(a: Self, b: Self) -> Self {
                    a.wrapping_sub(b)
                }
                fn mul(a: Self, b: Self) -> Self {
                    a.wrapping_mul(b)
                }
                fn div(a: Self, b: Self) -> Option<Self> {
                    a.checked_div(b)
                }
                fn rem(a: Self, b: Self) -> Option<Self> {
                    a.checked_rem(b)
                }
            }
        )*
    };
}

arith_int!(u8, u16, u32, u64, i8, i16, i32, i64);

macro_rules! arith_float {
    ($($t:ty),* $(,)?) => {
        $(
            impl Arith for $t {
                fn add(a: Self, b: Self) -> Self {
                    a + b
                }
                fn sub(a: Self, b: Self) -> Self {
                    a - b
                }
                fn mul(a: Self, b: Self) -> Self {
                    a * b
                }
                fn div(a: Self, b: Self) -> Option<Self> {
                    Some(a / b)
                }
                // IEEE-754 remainder: same sign as the dividend.
                fn rem(a: Self, b: Self) -> Option<Self> {
                    Some(a % b)
                }
            }
        )*
    };
}

arith_float!(f32, f64);

pub(crate) trait Negate: Sample {
    fn negate(value: Self) -> Self;
}

macro_rules! negate_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl Negate for $t {
                fn negate(value: Self) -> Self {
                    value.wrapping_neg()
                }
            }
        )*
    };
}

negate_int!(i8, i16, i32, i64);

macro_rules! negate_float {
    ($($t:ty),* $(,)?) => {
        $(
            impl Negate for $t {
                fn negate(value: Self) -> Self {
                    -value
                }
            }
        )*
    };
}

negate_float!(f32, f64);

/// The host-side interface sandboxed node code calls.
///
/// Every allocation returns a non-zero 32-bit handle into the transient
/// arena; handle `0` denotes failure. Read operations on an invalid handle
/// return a default without faulting, writes no-op, and only a series-series
/// length mismatch surfaces as a fault the sandbox observes as a trap. With
/// no state attached every channel and state call degrades to its default
/// and logs once.
pub struct Bindings {
    state: Option<SharedState>,
    errors: Arc<ErrorManager>,
    missing_state_logged: Arc<AtomicBool>,
}

impl Clone for Bindings {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            errors: self.errors.clone(),
            missing_state_logged: self.missing_state_logged.clone(),
        }
    }
}

impl Bindings {
    pub fn new(state: Option<SharedState>, errors: Arc<ErrorManager>) -> Self {
        Self {
            state,
            errors,
            missing_state_logged: Arc::new(AtomicBool::new(false)),
        }
    }

    fn with_state<R>(&self, default: R, f: impl FnOnce(&mut State) -> R) -> R {
        match &self.state {
            Some(shared) => f(&mut shared.lock()),
            None => {
                if !self.missing_state_logged.swap(true, Ordering::SeqCst) {
                    warn!("sandbox binding invoked with no state attached");
                }
                default
            }
        }
    }

    // Generic engines behind the typed surface.

    fn alloc_zeroed(&self, data_type: DataType, len: u32) -> u32 {
        self.with_state(0, |st| {
            st.arena.alloc_series(Series::zeroed(data_type, len as usize))
        })
    }

    fn index_at<T: Sample>(&self, handle: u32, index: u32) -> T {
        self.with_state(T::default(), |st| {
            st.arena
                .series(handle)
                .and_then(|s| s.at::<T>(index as isize))
                .unwrap_or_default()
        })
    }

    fn set_at<T: Sample>(&self, handle: u32, index: u32, value: T) {
        self.with_state((), |st| {
            if let Some(series) = st.arena.series_mut(handle) {
                series.set(index as usize, value);
            }
        })
    }

    /// Maps a series elementwise; `None` from `f` aborts with handle `0`.
    fn map_series<T: Sample>(&self, handle: u32, f: impl Fn(T) -> Option<T>) -> u32 {
        self.with_state(0, |st| {
            let Some(series) = st.arena.series(handle) else {
                return 0;
            };
            if series.data_type() != T::DATA_TYPE {
                return 0;
            }
            let mut values = Vec::with_capacity(series.len());
            for i in 0..series.len() {
                match f(series.at::<T>(i as isize).unwrap_or_default()) {
                    Some(v) => values.push(v),
                    None => return 0,
                }
            }
            st.arena.alloc_series(Series::from_vec(values))
        })
    }

    /// Zips two series elementwise. Invalid handles and absent results yield
    /// handle `0`; a length mismatch is the one fault the sandbox traps on.
    fn zip_series<T: Sample>(
        &self,
        a: u32,
        b: u32,
        f: impl Fn(T, T) -> Option<T>,
    ) -> Result<u32, RuntimeError> {
        self.with_state(Ok(0), |st| {
            let (Some(sa), Some(sb)) = (st.arena.series(a), st.arena.series(b)) else {
                return Ok(0);
            };
            if sa.data_type() != T::DATA_TYPE || sb.data_type() != T::DATA_TYPE {
                return Ok(0);
            }
            if sa.len() != sb.len() {
                return Err(RuntimeError::LengthMismatch {
                    left: sa.len(),
                    right: sb.len(),
                });
            }
            let mut values = Vec::with_capacity(sa.len());
            for i in 0..sa.len() {
                let x = sa.at::<T>(i as isize).unwrap_or_default();
                let y = sb.at::<T>(i as isize).unwrap_or_default();
                match f(x, y) {
                    Some(v) => values.push(v),
                    None => return Ok(0),
                }
            }
            Ok(st.arena.alloc_series(Series::from_vec(values)))
        })
    }

    /// Elementwise comparison of two series into a `0`/`1` u8 series.
    fn compare_series<T: Sample>(
        &self,
        a: u32,
        b: u32,
        f: impl Fn(&T, &T) -> bool,
    ) -> Result<u32, RuntimeError> {
        self.with_state(Ok(0), |st| {
            let (Some(sa), Some(sb)) = (st.arena.series(a), st.arena.series(b)) else {
                return Ok(0);
            };
            if sa.data_type() != T::DATA_TYPE || sb.data_type() != T::DATA_TYPE {
                return Ok(0);
            }
            if sa.len() != sb.len() {
                return Err(RuntimeError::LengthMismatch {
                    left: sa.len(),
                    right: sb.len(),
                });
            }
            let mut values = Vec::with_capacity(sa.len());
            for i in 0..sa.len() {
                let x = sa.at::<T>(i as isize).unwrap_or_default();
                let y = sb.at::<T>(i as isize).unwrap_or_default();
                values.push(u8::from(f(&x, &y)));
            }
            Ok(st.arena.alloc_series(Series::from_vec(values)))
        })
    }

    fn compare_scalar<T: Sample>(&self, handle: u32, value: T, f: impl Fn(&T, &T) -> bool) -> u32 {
        self.with_state(0, |st| {
            let Some(series) = st.arena.series(handle) else {
                return 0;
            };
            if series.data_type() != T::DATA_TYPE {
                return 0;
            }
            let mut values = Vec::with_capacity(series.len());
            for i in 0..series.len() {
                let x = series.at::<T>(i as isize).unwrap_or_default();
                values.push(u8::from(f(&x, &value)));
            }
            st.arena.alloc_series(Series::from_vec(values))
        })
    }

    fn load_series_slot(&self, slot: u32, init: u32) -> u32 {
        self.with_state(init, |st| {
            let node = st.current_node().to_string();
            // A slot stored earlier this tick still lives in the arena.
            if let Some(handle) = st.store.staged_series(&node, slot) {
                return handle;
            }
            if let Some(series) = st.store.series(&node, slot) {
                let copy = series.deep_copy();
                return st.arena.alloc_series(copy);
            }
            init
        })
    }

    fn store_series_slot(&self, slot: u32, handle: u32) {
        self.with_state((), |st| {
            if st.arena.series(handle).is_none() {
                return;
            }
            let node = st.current_node().to_string();
            st.store.stage_series(&node, slot, handle);
        })
    }

    // Type-agnostic surface.

    /// Sample count of a series; `0` for an invalid handle.
    pub fn series_len(&self, handle: u32) -> u32 {
        self.with_state(0, |st| {
            st.arena.series(handle).map_or(0, |s| s.len() as u32)
        })
    }

    /// Half-open `[start, end)` slice of any series. Invalid bounds return
    /// handle `0`.
    pub fn series_slice(&self, handle: u32, start: u32, end: u32) -> u32 {
        self.with_state(0, |st| {
            let Some(series) = st.arena.series(handle) else {
                return 0;
            };
            let Some(sub) = series.slice(start as usize, end as usize) else {
                return 0;
            };
            st.arena.alloc_series(sub)
        })
    }

    /// Logical NOT over a boolean-interpreted u8 series: `0 → 1`, anything
    /// else `→ 0`. Applying it twice normalizes truthy values to `1`.
    pub fn series_not_u8(&self, handle: u32) -> u32 {
        self.map_series::<u8>(handle, |x| Some(u8::from(x == 0)))
    }

    // Strings.

    pub fn string_create(&self, value: &str) -> u32 {
        self.with_state(0, |st| st.arena.alloc_string(value.to_string()))
    }

    pub fn string_get(&self, handle: u32) -> String {
        self.with_state(String::new(), |st| {
            st.arena
                .string(handle)
                .map(str::to_string)
                .unwrap_or_default()
        })
    }

    pub fn string_len(&self, handle: u32) -> u32 {
        self.with_state(0, |st| {
            st.arena.string(handle).map_or(0, |s| s.len() as u32)
        })
    }

    pub fn string_equal(&self, a: u32, b: u32) -> u32 {
        self.with_state(0, |st| {
            match (st.arena.string(a), st.arena.string(b)) {
                (Some(x), Some(y)) => u32::from(x == y),
                _ => 0,
            }
        })
    }

    pub fn string_concat(&self, a: u32, b: u32) -> u32 {
        self.with_state(0, |st| {
            let joined = match (st.arena.string(a), st.arena.string(b)) {
                (Some(x), Some(y)) => format!("{x}{y}"),
                _ => return 0,
            };
            st.arena.alloc_string(joined)
        })
    }

    pub fn state_load_str(&self, slot: u32, init: u32) -> u32 {
        self.with_state(init, |st| {
            let node = st.current_node().to_string();
            if let Some(handle) = st.store.staged_string(&node, slot) {
                return handle;
            }
            if let Some(value) = st.store.string(&node, slot) {
                let owned = value.to_string();
                return st.arena.alloc_string(owned);
            }
            init
        })
    }

    pub fn state_store_str(&self, slot: u32, handle: u32) {
        self.with_state((), |st| {
            if st.arena.string(handle).is_none() {
                return;
            }
            let node = st.current_node().to_string();
            st.store.stage_string(&node, slot, handle);
        })
    }

    // Channel strings.

    /// Latest string sample on a channel as a fresh handle; `0` when absent.
    pub fn channel_read_str(&self, key: ChannelKey) -> u32 {
        self.with_state(0, |st| match st.latest_value(key) {
            Some(SampleValue::Str(value)) => st.arena.alloc_string(value),
            _ => 0,
        })
    }

    /// Consumes a string handle into a pending channel write.
    pub fn channel_write_str(&self, key: ChannelKey, handle: u32) {
        self.with_state((), |st| {
            let Some(value) = st.arena.string(handle).map(str::to_string) else {
                return;
            };
            let mut data = Series::new(DataType::String);
            data.push_str(&value);
            st.write_channel(key, data, Series::from_vec(vec![TimeStamp::now()]));
        })
    }

    /// Reports a guest panic. The node's invocation fails; the runtime
    /// continues. This is the one report for the fault: the trap the
    /// linker forces afterwards is not reported again.
    pub fn panic(&self, message: &str) {
        self.errors
            .report(&RuntimeError::WasmPanic(message.to_string()));
    }

    /// Routes sandbox-level faults to the shared error manager.
    pub(crate) fn report(&self, err: &RuntimeError) {
        self.errors.report(err);
    }
}

macro_rules! numeric_bindings {
    ($($t:ty),* $(,)?) => {
        impl Bindings {
            $(
                paste::paste! {
                    pub fn [<series_create_empty_ $t>](&self, len: u32) -> u32 {
                        self.alloc_zeroed(<$t as Sample>::DATA_TYPE, len)
                    }

                    pub fn [<series_index_ $t>](&self, handle: u32, index: u32) -> $t {
                        self.index_at::<$t>(handle, index)
                    }

                    pub fn [<series_set_element_ $t>](&self, handle: u32, index: u32, value: $t) {
                        self.set_at::<$t>(handle, index, value)
                    }

                    pub fn [<series_element_add_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.map_series::<$t>(handle, move |x| Some(<$t as Arith>::add(x, value)))
                    }

                    pub fn [<series_element_sub_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.map_series::<$t>(handle, move |x| Some(<$t as Arith>::sub(x, value)))
                    }

                    pub fn [<series_element_mul_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.map_series::<$t>(handle, move |x| Some(<$t as Arith>::mul(x, value)))
                    }

                    pub fn [<series_element_div_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.map_series::<$t>(handle, move |x| <$t as Arith>::div(x, value))
                    }

                    pub fn [<series_element_mod_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.map_series::<$t>(handle, move |x| <$t as Arith>::rem(x, value))
                    }

                    /// Reversed subtraction: `value - series`.
                    pub fn [<series_element_rsub_ $t>](&self, value: $t, handle: u32) -> u32 {
                        self.map_series::<$t>(handle, move |x| Some(<$t as Arith>::sub(value, x)))
                    }

                    /// Reversed division: `value / series`.
                    pub fn [<series_element_rdiv_ $t>](&self, value: $t, handle: u32) -> u32 {
                        self.map_series::<$t>(handle, move |x| <$t as Arith>::div(value, x))
                    }

                    pub fn [<series_series_add_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.zip_series::<$t>(a, b, |x, y| Some(<$t as Arith>::add(x, y)))
                    }

                    pub fn [<series_series_sub_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.zip_series::<$t>(a, b, |x, y| Some(<$t as Arith>::sub(x, y)))
                    }

                    pub fn [<series_series_mul_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.zip_series::<$t>(a, b, |x, y| Some(<$t as Arith>::mul(x, y)))
                    }

                    pub fn [<series_series_div_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.zip_series::<$t>(a, b, |x, y| <$t as Arith>::div(x, y))
                    }

                    pub fn [<series_series_mod_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.zip_series::<$t>(a, b, |x, y| <$t as Arith>::rem(x, y))
                    }

                    pub fn [<series_compare_eq_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.compare_series::<$t>(a, b, |x, y| x == y)
                    }

                    pub fn [<series_compare_ne_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.compare_series::<$t>(a, b, |x, y| x != y)
                    }

                    pub fn [<series_compare_lt_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.compare_series::<$t>(a, b, |x, y| x < y)
                    }

                    pub fn [<series_compare_le_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.compare_series::<$t>(a, b, |x, y| x <= y)
                    }

                    pub fn [<series_compare_gt_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.compare_series::<$t>(a, b, |x, y| x > y)
                    }

                    pub fn [<series_compare_ge_ $t>](&self, a: u32, b: u32) -> Result<u32, RuntimeError> {
                        self.compare_series::<$t>(a, b, |x, y| x >= y)
                    }

                    pub fn [<series_compare_eq_scalar_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.compare_scalar::<$t>(handle, value, |x, y| x == y)
                    }

                    pub fn [<series_compare_ne_scalar_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.compare_scalar::<$t>(handle, value, |x, y| x != y)
                    }

                    pub fn [<series_compare_lt_scalar_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.compare_scalar::<$t>(handle, value, |x, y| x < y)
                    }

                    pub fn [<series_compare_le_scalar_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.compare_scalar::<$t>(handle, value, |x, y| x <= y)
                    }

                    pub fn [<series_compare_gt_scalar_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.compare_scalar::<$t>(handle, value, |x, y| x > y)
                    }

                    pub fn [<series_compare_ge_scalar_ $t>](&self, handle: u32, value: $t) -> u32 {
                        self.compare_scalar::<$t>(handle, value, |x, y| x >= y)
                    }

                    /// Latest value on the channel cast to the target type,
                    /// default when absent.
                    pub fn [<channel_read_ $t>](&self, key: ChannelKey) -> $t {
                        self.with_state(<$t>::default(), |st| {
                            st.latest_value(key)
                                .map(|v| v.[<as_ $t>]())
                                .unwrap_or_default()
                        })
                    }

                    /// Enqueues a single-sample write for the post-tick flush.
                    pub fn [<channel_write_ $t>](&self, key: ChannelKey, value: $t) {
                        self.with_state((), |st| {
                            st.write_channel(
                                key,
                                Series::from_vec(vec![value]),
                                Series::from_vec(vec![TimeStamp::now()]),
                            )
                        })
                    }

                    pub fn [<state_load_ $t>](&self, slot: u32, init: $t) -> $t {
                        self.with_state(init, |st| {
                            let node = st.current_node().to_string();
                            st.store
                                .scalar(&node, slot)
                                .map(|v| v.[<as_ $t>]())
                                .unwrap_or(init)
                        })
                    }

                    pub fn [<state_store_ $t>](&self, slot: u32, value: $t) {
                        self.with_state((), |st| {
                            let node = st.current_node().to_string();
                            st.store.store_scalar(&node, slot, value.into_sample_value())
                        })
                    }

                    pub fn [<state_load_series_ $t>](&self, slot: u32, init: u32) -> u32 {
                        self.load_series_slot(slot, init)
                    }

                    pub fn [<state_store_series_ $t>](&self, slot: u32, handle: u32) {
                        self.store_series_slot(slot, handle)
                    }
                }
            )*
        }
    };
}

numeric_bindings!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

macro_rules! negate_bindings {
    ($($t:ty),* $(,)?) => {
        impl Bindings {
            $(
                paste::paste! {
                    pub fn [<series_negate_ $t>](&self, handle: u32) -> u32 {
                        self.map_series::<$t>(handle, |x| Some(<$t as Negate>::negate(x)))
                    }
                }
            )*
        }
    };
}

// Unary negate exists for signed and float types only; negating an unsigned
// series is not offered.
negate_bindings!(i8, i16, i32, i64, f32, f64);
