use crate::attach::{AttachSession, Tracer};
use crate::error::{AttachError, MapOpenError, PidError, ReadError, SinkError};
use crate::{CaptureSink, MemoryReader, MemoryRegion, ProcessId, Procfs, is_selected};
use log::{debug, error, info, trace, warn};
use std::fs::File;
use std::io::Write;

pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// bytes shown in the trace-level preview of each captured region.
const PREVIEW_LEN: usize = 16;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// largest single read handed to the memory reader.
    pub chunk_size: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

/// a selected region that could not be read in full.
#[derive(Debug)]
pub struct RegionWarning {
    pub region:    MemoryRegion,
    /// address of the read that came back short.
    pub address:   u64,
    pub requested: usize,
    pub obtained:  usize,
    pub reason:    String,
}

/// what happened to one pid.
#[derive(Debug)]
pub struct PidReport {
    pub pid:              ProcessId,
    pub regions_seen:     usize,
    pub regions_selected: usize,
    /// selected regions read in full.
    pub regions_captured: usize,
    pub bytes_written:    u64,
    pub warnings:         Vec<RegionWarning>,
    /// why capture of this pid stopped early, if it did.
    pub error:            Option<PidError>,
}

impl PidReport {
    fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            regions_seen: 0,
            regions_selected: 0,
            regions_captured: 0,
            bytes_written: 0,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// totals over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub visited:          usize,
    pub captured:         usize,
    pub failed:           usize,
    pub regions_captured: usize,
    pub short_reads:      usize,
    pub bytes_written:    u64,
}

impl RunSummary {
    pub fn record(&mut self, report: &PidReport) {
        self.visited += 1;
        if report.is_ok() {
            self.captured += 1;
        } else {
            self.failed += 1;
        }
        self.regions_captured += report.regions_captured;
        self.short_reads += report.warnings.len();
        self.bytes_written += report.bytes_written;
    }
}

/// ends a pid early. only `Sink` escapes [`Extractor::run`].
enum Failure {
    Pid(PidError),
    Sink(SinkError),
}

impl From<AttachError> for Failure {
    fn from(err: AttachError) -> Self {
        Failure::Pid(err.into())
    }
}

impl From<MapOpenError> for Failure {
    fn from(err: MapOpenError) -> Self {
        Failure::Pid(err.into())
    }
}

impl From<ReadError> for Failure {
    fn from(err: ReadError) -> Self {
        Failure::Pid(err.into())
    }
}

impl From<SinkError> for Failure {
    fn from(err: SinkError) -> Self {
        Failure::Sink(err)
    }
}

/// attach, walk the maps, copy the selected regions out, detach.
pub struct Extractor<T> {
    procfs:  Procfs,
    tracer:  T,
    options: ExtractOptions,
}

impl<T: Tracer> Extractor<T> {
    pub fn new(procfs: Procfs, tracer: T, options: ExtractOptions) -> Self {
        Self { procfs, tracer, options }
    }

    pub fn procfs(&self) -> &Procfs {
        &self.procfs
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// capture one pid into `sink`.
    ///
    /// per-pid failures end up in [`PidReport::error`]; only a failing
    /// sink is returned as an error, and even then the process has been
    /// detached before this returns.
    pub fn run<W: Write>(&self, pid: ProcessId, sink: &CaptureSink<W>) -> Result<PidReport, SinkError> {
        let mut report = PidReport::new(pid);
        let outcome = self.capture(pid, sink, &mut report);
        self.tracer.reap();

        match outcome {
            Ok(()) => info!(
                "pid {}: captured {} of {} selected regions, {} bytes",
                pid, report.regions_captured, report.regions_selected, report.bytes_written
            ),
            Err(Failure::Pid(err)) => {
                error!("pid {}: {}", pid, err);
                report.error = Some(err);
            }
            Err(Failure::Sink(err)) => return Err(err),
        }

        Ok(report)
    }

    /// capture every pid in turn. a pid that fails does not stop the rest.
    pub fn run_all<W, I>(&self, pids: I, sink: &CaptureSink<W>) -> Result<RunSummary, SinkError>
    where
        W: Write,
        I: IntoIterator<Item = ProcessId>,
    {
        let mut summary = RunSummary::default();
        for pid in pids {
            let report = self.run(pid, sink)?;
            summary.record(&report);
        }
        sink.flush()?;
        Ok(summary)
    }

    fn capture<W: Write>(
        &self,
        pid: ProcessId,
        sink: &CaptureSink<W>,
        report: &mut PidReport,
    ) -> Result<(), Failure> {
        let mut session = AttachSession::acquire(&self.tracer, pid)?;
        let mut regions = self.procfs.open_maps(pid)?;
        let mut memory: Option<MemoryReader<File>> = None;

        for region in regions.by_ref() {
            let region = region.map_err(|err| Failure::Pid(PidError::MapRead(err)))?;
            report.regions_seen += 1;

            if !is_selected(&region) {
                continue;
            }
            debug!("pid {}: {}", pid, region);
            report.regions_selected += 1;

            if region.is_empty() {
                report.regions_captured += 1;
                continue;
            }

            let reader = match memory.take() {
                Some(reader) => reader,
                None => self.procfs.open_mem(pid)?,
            };
            self.copy_region(pid, &region, &reader, sink, report)?;
            memory = Some(reader);
        }

        if regions.skipped() > 0 {
            debug!("pid {}: skipped {} malformed maps lines", pid, regions.skipped());
        }

        session.release();
        Ok(())
    }

    /// stream `region` to the sink chunk by chunk. a short read writes what
    /// was obtained, records a warning and ends this region.
    fn copy_region<W: Write>(
        &self,
        pid: ProcessId,
        region: &MemoryRegion,
        reader: &MemoryReader<File>,
        sink: &CaptureSink<W>,
        report: &mut PidReport,
    ) -> Result<(), Failure> {
        let chunk_size = self.options.chunk_size.max(1) as u64;
        let mut address = region.start;

        while address < region.end {
            let len = (region.end - address).min(chunk_size) as usize;

            match reader.read(address, len) {
                Ok(bytes) => {
                    if address == region.start {
                        trace!("{:#x}: {}", address, hex::encode(&bytes[..bytes.len().min(PREVIEW_LEN)]));
                    }
                    sink.append(pid, address, &bytes)?;
                    report.bytes_written += bytes.len() as u64;
                }
                Err(ReadError::ShortRead { address, requested, bytes, cause }) => {
                    warn!(
                        "pid {}: short read in {} at {:#x}: got {} of {} bytes ({})",
                        pid, region.label, address, bytes.len(), requested, cause
                    );
                    if !bytes.is_empty() {
                        sink.append(pid, address, &bytes)?;
                    }
                    report.bytes_written += bytes.len() as u64;
                    report.warnings.push(RegionWarning {
                        region: region.clone(),
                        address,
                        requested,
                        obtained: bytes.len(),
                        reason: cause.to_string(),
                    });
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }

            address += len as u64;
        }

        report.regions_captured += 1;
        Ok(())
    }
}
