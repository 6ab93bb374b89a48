//! Realtime scheduling hooks for the event-driven loop modes.
//!
//! Failures here are reported but never fatal: a runtime denied `SCHED_FIFO`
//! still ticks, just without the latency guarantee.

use arc_types::log::warn;

/// Applies `SCHED_FIFO` at `priority` to the calling thread.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> bool {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if rc != 0 {
        warn!("failed to set SCHED_FIFO priority {priority}: errno {rc}");
        return false;
    }
    true
}

/// Pins the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpu: i32) -> bool {
    if cpu < 0 {
        return true;
    }
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu as usize, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        warn!("failed to pin thread to cpu {cpu}");
        return false;
    }
    true
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(priority: i32) -> bool {
    warn!("realtime priority {priority} requested on an unsupported platform");
    false
}

#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(cpu: i32) -> bool {
    if cpu >= 0 {
        warn!("cpu affinity {cpu} requested on an unsupported platform");
    }
    cpu < 0
}
