//! Thread placement helpers. Pinning and niceness are only implemented on
//! Linux (including Android); elsewhere every call reports a configuration
//! error and callers fall back to unpinned threads.

use crate::error::Error;
use crate::error::ErrorKind;
use crate::error::Result;

#[cfg(target_os = "linux")]
fn os_error(prefix: &str) -> Error {
    let err = std::io::Error::last_os_error();
    Error::from((ErrorKind::ConfigError, format!("{}: {}", prefix, err))).with_cause(err)
}

/// Restricts the calling thread to the given cpu ids.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu_ids: &[usize]) -> Result<()> {
    if cpu_ids.is_empty() {
        return Err((ErrorKind::ConfigError, "can not pin a thread to an empty cpu set").into());
    }

    // safety: cpu_set_t is a plain bitmask, zeroed is its empty state.
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    for &id in cpu_ids {
        if id >= libc::CPU_SETSIZE as usize {
            return Err((
                ErrorKind::ConfigError,
                format!("cpu id {} is out of the cpu set range", id),
            )
                .into());
        }
        unsafe { libc::CPU_SET(id, &mut set) };
    }

    let ret = unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) };
    if ret != 0 {
        return Err(os_error("sched_setaffinity failed"));
    }
    Ok(())
}

/// The cpu ids the calling thread is allowed to run on.
#[cfg(target_os = "linux")]
pub fn current_thread_affinity() -> Result<Vec<usize>> {
    let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
    let ret =
        unsafe { libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) };
    if ret != 0 {
        return Err(os_error("sched_getaffinity failed"));
    }
    Ok((0..libc::CPU_SETSIZE as usize)
        .filter(|&id| unsafe { libc::CPU_ISSET(id, &set) })
        .collect())
}

/// Sets the niceness of the calling thread only, not the whole process.
#[cfg(target_os = "linux")]
pub fn set_current_thread_nice(nice: i32) -> Result<()> {
    let tid = unsafe { libc::syscall(libc::SYS_gettid) } as libc::id_t;
    let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice) };
    if ret != 0 {
        return Err(os_error("setpriority failed"));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu_ids: &[usize]) -> Result<()> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn current_thread_affinity() -> Result<Vec<usize>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_nice(_nice: i32) -> Result<()> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> Error {
    (
        ErrorKind::ConfigError,
        "thread affinity is not supported on this platform",
    )
        .into()
}
