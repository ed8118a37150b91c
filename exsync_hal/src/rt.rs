//! Real-time setup for the sampler thread.
//!
//! All calls are no-ops unless the `rt` feature is enabled.

use exsync_common::hal::driver::HalError;
#[cfg(feature = "rt")]
use tracing::info;

/// Pin the current thread to a specific CPU core.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), HalError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| HalError::InitFailed(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| HalError::InitFailed(format!("sched_setaffinity failed: {e}")))?;
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), HalError> {
    Ok(())
}

/// Set SCHED_FIFO with the given priority on the current thread.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), HalError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(HalError::InitFailed(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), HalError> {
    Ok(())
}

/// Apply the configured pinning and priority to the calling thread.
pub fn rt_setup(cpu_core: Option<usize>, priority: Option<i32>) -> Result<(), HalError> {
    if let Some(cpu) = cpu_core {
        rt_set_affinity(cpu)?;
    }
    if let Some(priority) = priority {
        rt_set_scheduler(priority)?;
    }
    #[cfg(feature = "rt")]
    info!("RT setup applied (cpu={cpu_core:?}, priority={priority:?})");
    Ok(())
}

/// Detect if the calling thread runs under a real-time policy.
pub fn detect_rt_mode() -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{SCHED_FIFO, SCHED_RR, sched_getscheduler};
        let policy = unsafe { sched_getscheduler(0) };
        policy == SCHED_FIFO || policy == SCHED_RR
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}
