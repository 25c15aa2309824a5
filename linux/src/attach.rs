use crate::ProcessId;
use crate::error::AttachError;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::libc::PTRACE_EVENT_STOP;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::Signal;
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// something that can stop and resume a process.
pub trait Tracer {
    /// stop `pid` and block until it has actually stopped.
    fn attach(&self, pid: ProcessId) -> Result<(), AttachError>;

    /// resume `pid`.
    fn detach(&self, pid: ProcessId) -> nix::Result<()>;

    /// detach any process an earlier failed attach left traced.
    fn reap(&self) {}
}

/// [`Tracer`] backed by `ptrace(2)`.
///
/// attaches with `PTRACE_SEIZE` + `PTRACE_INTERRUPT`, so no SIGSTOP is ever
/// queued to the target. signals the target receives while we wait for the
/// stop are passed straight through, and exec reports as a ptrace event
/// rather than a SIGTRAP.
#[derive(Debug, Default)]
pub struct Ptrace {
    /// upper bound on the wait for the attach-stop. `None` waits forever.
    pub timeout: Option<Duration>,

    /// seized but not yet stopped; detached by [`Ptrace::reap`].
    stranded: Mutex<Vec<ProcessId>>,
}

impl Ptrace {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            stranded: Mutex::default(),
        }
    }

    /// pids still traced after a failed attach.
    pub fn stranded(&self) -> Vec<ProcessId> {
        self.stranded.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// detach every stranded pid that has reached a stop since, forget
    /// the ones that are gone.
    pub fn reap(&self) {
        let mut stranded = self.stranded.lock().unwrap_or_else(PoisonError::into_inner);
        stranded.retain(|&pid| match wait::waitpid(Pid::from(pid), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Ok(WaitStatus::Continued(_)) => true,
            Ok(WaitStatus::Stopped(_, signal)) => !detach_logged(pid, Some(signal)),
            Ok(WaitStatus::PtraceEvent(..)) | Ok(WaitStatus::PtraceSyscall(_)) => !detach_logged(pid, None),
            Ok(_) => false,
            Err(Errno::EINTR) => true,
            Err(_) => false,
        });
    }

    fn wait_for_stop(&self, pid: ProcessId) -> Result<(), AttachError> {
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let flags = deadline.map(|_| WaitPidFlag::WNOHANG);

        loop {
            match wait::waitpid(Pid::from(pid), flags) {
                // interrupt-stop, or group-stop if it was already job-control stopped
                Ok(WaitStatus::PtraceEvent(_, _, PTRACE_EVENT_STOP)) => return Ok(()),
                Ok(WaitStatus::PtraceEvent(_, _, event)) => {
                    debug!("pid {}: ptrace event {} before stop", pid, event);
                    resume(pid, None)?;
                }
                Ok(WaitStatus::Stopped(_, signal)) => {
                    debug!("pid {}: passing {} through", pid, signal);
                    resume(pid, Some(signal))?;
                }
                Ok(WaitStatus::PtraceSyscall(_)) => resume(pid, None)?,
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => {
                    return Err(AttachError::NoSuchProcess(pid));
                }
                Ok(WaitStatus::StillAlive) => {
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(AttachError::Timeout(pid));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Ok(status) => debug!("pid {}: ignoring wait status {:?}", pid, status),
                Err(Errno::EINTR) => continue,
                Err(errno) => return Err(AttachError::from_errno(pid, errno)),
            }
        }
    }

    /// give up on a seized pid. a tracee that is not in a stop cannot be
    /// detached yet, so it is kept for [`Ptrace::reap`].
    fn abandon(&self, pid: ProcessId) {
        match ptrace::detach(Pid::from(pid), None) {
            Ok(()) => info!("ptrace::detach({})", pid),
            Err(errno) => {
                debug!("ptrace::detach({}): {}, detaching once it stops", pid, errno);
                self.stranded.lock().unwrap_or_else(PoisonError::into_inner).push(pid);
            }
        }
    }
}

fn resume(pid: ProcessId, signal: Option<Signal>) -> Result<(), AttachError> {
    ptrace::cont(Pid::from(pid), signal).map_err(|errno| AttachError::from_errno(pid, errno))
}

/// `true` when the detach went through.
fn detach_logged(pid: ProcessId, signal: Option<Signal>) -> bool {
    match ptrace::detach(Pid::from(pid), signal) {
        Ok(()) => {
            info!("ptrace::detach({})", pid);
            true
        }
        Err(errno) => {
            warn!("ptrace::detach({}): {}", pid, errno);
            false
        }
    }
}

impl Tracer for Ptrace {
    fn attach(&self, pid: ProcessId) -> Result<(), AttachError> {
        ptrace::seize(Pid::from(pid), Options::PTRACE_O_TRACEEXEC)
            .map_err(|errno| AttachError::from_errno(pid, errno))?;

        let stopped = ptrace::interrupt(Pid::from(pid))
            .map_err(|errno| AttachError::from_errno(pid, errno))
            .and_then(|()| self.wait_for_stop(pid));

        if let Err(err) = &stopped {
            if !matches!(err, AttachError::NoSuchProcess(_)) {
                warn!("pid {}: {}, abandoning attach", pid, err);
                self.abandon(pid);
            }
        }
        stopped
    }

    fn detach(&self, pid: ProcessId) -> nix::Result<()> {
        ptrace::detach(Pid::from(pid), None)
    }

    fn reap(&self) {
        Ptrace::reap(self);
    }
}

impl Drop for Ptrace {
    fn drop(&mut self) {
        self.reap();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Attached,
    Detached,
}

/// proof that a process is stopped and its memory is safe to read.
///
/// created only by a successful attach; detaches exactly once, either on
/// an explicit [`release`](Self::release) or when dropped.
pub struct AttachSession<'t, T: Tracer + ?Sized> {
    tracer: &'t T,
    pid:    ProcessId,
    state:  SessionState,
}

impl<'t, T: Tracer + ?Sized> AttachSession<'t, T> {
    pub fn acquire(tracer: &'t T, pid: ProcessId) -> Result<Self, AttachError> {
        tracer.attach(pid)?;
        info!("ptrace::attach({})", pid);

        Ok(Self {
            tracer,
            pid,
            state: SessionState::Attached,
        })
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// detach from the process. no-op when already released.
    pub fn release(&mut self) {
        if self.state == SessionState::Detached {
            return;
        }
        self.state = SessionState::Detached;

        match self.tracer.detach(self.pid) {
            Ok(()) => info!("ptrace::detach({})", self.pid),
            Err(errno) => warn!("ptrace::detach({}): {}", self.pid, errno),
        }
    }
}

impl<T: Tracer + ?Sized> Drop for AttachSession<'_, T> {
    fn drop(&mut self) {
        self.release();
    }
}
