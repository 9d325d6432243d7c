//! Kill-on-close Job Objects for Windows shell processes.
//!
//! Windows never signals children when the host dies. Binding each shell
//! process to a job with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE` makes the
//! kernel terminate the whole tree once the last job handle is closed,
//! including when the host crashes.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::ptr;

use tokio::process::Child;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
    SetInformationJobObject,
};

/// Owns the job handle; dropping it terminates every process in the job.
#[derive(Debug)]
pub(crate) struct KillOnCloseJob {
    handle: HANDLE,
}

// SAFETY: a job HANDLE is a kernel object identifier with no thread-affine
// state; `CloseHandle` may be called from any thread.
unsafe impl Send for KillOnCloseJob {}

impl Drop for KillOnCloseJob {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        // SAFETY: handle came from `CreateJobObjectW` and is closed once.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Put `child` (and everything it later spawns) into a fresh kill-on-close job.
pub(crate) fn attach_kill_on_close(child: &Child) -> Result<KillOnCloseJob, String> {
    let process_handle = child
        .raw_handle()
        .ok_or_else(|| "child process handle unavailable".to_string())?
        as HANDLE;
    if process_handle.is_null() {
        return Err("child process handle was null".to_string());
    }

    // SAFETY: null attributes and name request an unnamed job with the
    // default security descriptor.
    let handle = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
    if handle.is_null() {
        return Err(last_os_error("CreateJobObjectW"));
    }
    let job = KillOnCloseJob { handle };

    let mut limits = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
    limits.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
    let info_len = u32::try_from(mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>())
        .map_err(|_| "job limit payload exceeded u32 size".to_string())?;
    // SAFETY: `limits` is a valid initialized payload of `info_len` bytes.
    let configured = unsafe {
        SetInformationJobObject(
            job.handle,
            JobObjectExtendedLimitInformation,
            ptr::from_ref(&limits).cast::<c_void>(),
            info_len,
        )
    };
    if configured == 0 {
        return Err(last_os_error("SetInformationJobObject"));
    }

    // SAFETY: both handles are valid for the duration of the call.
    if unsafe { AssignProcessToJobObject(job.handle, process_handle) } == 0 {
        return Err(last_os_error("AssignProcessToJobObject"));
    }
    Ok(job)
}

fn last_os_error(operation: &str) -> String {
    format!("{operation} failed: {}", io::Error::last_os_error())
}
