use crate::ProcessId;
use nix::errno::Errno;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// failure to stop a process for memory access.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("not permitted to attach to pid {0}")]
    Permission(ProcessId),

    #[error("pid {0} does not exist")]
    NoSuchProcess(ProcessId),

    #[error("pid {0} did not stop within the attach timeout")]
    Timeout(ProcessId),

    #[error("attach to pid {pid} failed: {errno}")]
    Other { pid: ProcessId, errno: Errno },
}

impl AttachError {
    pub(crate) fn from_errno(pid: ProcessId, errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => AttachError::Permission(pid),
            Errno::ESRCH => AttachError::NoSuchProcess(pid),
            errno => AttachError::Other { pid, errno },
        }
    }
}

/// the map description of a process could not be opened.
#[derive(Debug, Error)]
#[error("failed to open {}: {source}", path.display())]
pub struct MapOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// why a positioned read stopped before the requested length.
#[derive(Debug)]
pub enum ShortReadCause {
    /// the source returned zero bytes.
    EndOfData,

    /// the source returned an error, typically EIO on an unmapped page.
    Fault(io::Error),
}

impl fmt::Display for ShortReadCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShortReadCause::EndOfData => write!(f, "end of data"),
            ShortReadCause::Fault(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to open {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `bytes` holds exactly what was obtained, never padded.
    #[error("short read at {address:#x}: got {} of {requested} bytes ({cause})", bytes.len())]
    ShortRead {
        address: u64,
        requested: usize,
        bytes: Vec<u8>,
        cause: ShortReadCause,
    },
}

impl ReadError {
    /// number of requested bytes that were not obtained.
    pub fn shortfall(&self) -> usize {
        match self {
            ReadError::OpenFailed { .. } => 0,
            ReadError::ShortRead { requested, bytes, .. } => requested.saturating_sub(bytes.len()),
        }
    }
}

/// the capture destination failed. always fatal to the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open output {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write output: {0}")]
    WriteFailed(#[source] io::Error),
}

/// everything that can end the capture of a single pid early.
#[derive(Debug, Error)]
pub enum PidError {
    #[error(transparent)]
    Attach(#[from] AttachError),

    #[error(transparent)]
    MapOpen(#[from] MapOpenError),

    #[error("failed reading memory map: {0}")]
    MapRead(#[source] io::Error),

    #[error(transparent)]
    Read(#[from] ReadError),
}
