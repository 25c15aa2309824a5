//! Capture the heap, stack and deleted-file mappings of live linux processes.
//!
//! A capture attaches to the target with ptrace, walks `/proc/<pid>/maps`,
//! and copies every selected region out of `/proc/<pid>/mem` into a
//! [`CaptureSink`]. The target is always detached again before
//! [`Extractor::run`] returns.

pub mod attach;
pub mod error;
pub mod maps;
pub mod pid;
pub mod pipeline;
pub mod procfs;
pub mod reader;
pub mod select;
pub mod sink;

pub use attach::{AttachSession, Ptrace, SessionState, Tracer};
pub use error::{AttachError, MapOpenError, PidError, ReadError, ShortReadCause, SinkError};
pub use maps::{MemoryRegion, Regions};
pub use pid::ProcessId;
pub use pipeline::{DEFAULT_CHUNK_SIZE, ExtractOptions, Extractor, PidReport, RegionWarning, RunSummary};
pub use procfs::{DEFAULT_PROC_ROOT, Procfs, parse_pids};
pub use reader::{MemoryReader, ReadAt};
pub use select::{FORENSIC_MARKERS, is_selected};
pub use sink::{CaptureSink, FrameHeader, OutputFormat};
