//! Process-group management for shell subprocesses.
//!
//! On Unix every shell command runs in a fresh session, so its pid doubles as
//! the process-group id and one `killpg` reaches the command and everything it
//! spawned. Windows has no process groups in that sense; the whole process
//! tree is terminated with `taskkill /T` instead.

use std::io;

/// Signal strength used when terminating a process tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    /// SIGTERM / `taskkill` without `/F`.
    Terminate,
    /// SIGKILL / `taskkill /F`.
    Kill,
}

#[cfg(unix)]
impl TerminationSignal {
    fn as_libc(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// Which processes a signal reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// Nothing left to signal.
    NotRunning,
    /// The whole process group (Unix) or process tree (Windows).
    Tree,
    /// Group signalling failed; only the direct child was signalled.
    ChildOnly,
}

/// Make the child the leader of a new session before it execs.
///
/// On Linux the child is also bound to our lifetime with
/// `PR_SET_PDEATHSIG`, so it does not outlive a crashed host.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    // SAFETY: the closure only calls async-signal-safe libc functions.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// Detach the child from our console and give it its own process group.
#[cfg(windows)]
pub fn set_new_session(cmd: &mut tokio::process::Command) {
    use windows_sys::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW};
    cmd.creation_flags(CREATE_NO_WINDOW | CREATE_NEW_PROCESS_GROUP);
}

/// Signal the process group led by `pid`, falling back to the lone child
/// when the group cannot be signalled (e.g. `EPERM`).
#[cfg(unix)]
pub fn signal_process_tree(pid: u32, signal: TerminationSignal) -> io::Result<KillOutcome> {
    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid {pid} out of range"),
        ));
    };
    let sig = signal.as_libc();

    // SAFETY: plain syscall on a pid we spawned.
    if unsafe { libc::killpg(raw_pid, sig) } == 0 {
        return Ok(KillOutcome::Tree);
    }
    let group_err = io::Error::last_os_error();
    if group_err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(KillOutcome::NotRunning);
    }
    tracing::debug!(pid, ?signal, "process-group signal failed ({group_err}); signalling child only");

    // SAFETY: as above.
    if unsafe { libc::kill(raw_pid, sig) } == 0 {
        return Ok(KillOutcome::ChildOnly);
    }
    let child_err = io::Error::last_os_error();
    if child_err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(KillOutcome::NotRunning);
    }
    Err(child_err)
}

/// Terminate the process tree rooted at `pid` with `taskkill /T`.
#[cfg(windows)]
pub fn signal_process_tree(pid: u32, signal: TerminationSignal) -> io::Result<KillOutcome> {
    use std::process::{Command, Stdio};

    let mut cmd = Command::new("taskkill");
    cmd.arg("/PID").arg(pid.to_string()).arg("/T");
    if signal == TerminationSignal::Kill {
        cmd.arg("/F");
    }
    let status = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(KillOutcome::Tree)
    } else if is_process_running(pid) {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    } else {
        Ok(KillOutcome::NotRunning)
    }
}

/// Best-effort liveness probe.
#[cfg(unix)]
#[must_use]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(raw_pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs permission and existence checks only.
    if unsafe { libc::kill(raw_pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
#[must_use]
pub fn is_process_running(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, WAIT_TIMEOUT};
    use windows_sys::Win32::System::Threading::{
        OpenProcess, PROCESS_SYNCHRONIZE, WaitForSingleObject,
    };

    // SAFETY: Win32 API call.
    let handle = unsafe { OpenProcess(PROCESS_SYNCHRONIZE, 0, pid) };
    if handle.is_null() {
        return false;
    }
    // SAFETY: `handle` is valid until closed below.
    let waited = unsafe { WaitForSingleObject(handle, 0) };
    // SAFETY: always close the handle we opened.
    unsafe {
        CloseHandle(handle);
    }
    waited == WAIT_TIMEOUT
}

/// RAII guard that kills a spawned process tree unless disarmed.
///
/// Held by the execution driver so that a dropped or aborted driver task
/// never leaves the command running. Disarm once the child has been reaped.
#[derive(Debug)]
pub struct ProcessTreeGuard {
    pid: Option<u32>,
}

impl ProcessTreeGuard {
    #[must_use]
    pub fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    pub fn disarm(&mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessTreeGuard {
    fn drop(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        if let Err(err) = signal_process_tree(pid, TerminationSignal::Kill) {
            tracing::warn!(pid, "failed to kill abandoned shell process: {err}");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn signalling_an_exited_process_reports_not_running() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert_eq!(
            signal_process_tree(pid, TerminationSignal::Kill).unwrap(),
            KillOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn group_signal_reaches_the_session_leader() {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30");
        set_new_session(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id().unwrap();

        assert_eq!(
            signal_process_tree(pid, TerminationSignal::Terminate).unwrap(),
            KillOutcome::Tree
        );
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
        assert!(!is_process_running(pid));
    }

    #[tokio::test]
    async fn dropped_guard_kills_the_tree() {
        let mut cmd = tokio::process::Command::new("sleep");
        cmd.arg("30");
        set_new_session(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id();

        drop(ProcessTreeGuard::new(pid));
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn disarmed_guard_is_inert() {
        let mut guard = ProcessTreeGuard::new(Some(u32::MAX));
        guard.disarm();
        drop(guard);
    }
}
