use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use procmem_linux::{
    CaptureSink, DEFAULT_CHUNK_SIZE, DEFAULT_PROC_ROOT, ExtractOptions, Extractor, OutputFormat,
    ProcessId, Procfs, Ptrace,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "Capture the heap, stack and deleted-file mappings of a process. May require elevated permissions."
)]
struct Args {
    #[arg(help = "PID of target process, 0 captures every process.")]
    pid: u32,

    #[arg(help = "Output path. Writes to stdout when absent.")]
    output: Option<PathBuf>,

    #[arg(long, help = "Prefix every chunk with its pid, address and length.")]
    framed: bool,

    #[arg(long, value_name = "MS", help = "Give up on a process that has not stopped after this long.")]
    attach_timeout: Option<u64>,

    #[arg(long, value_name = "DIR", default_value = DEFAULT_PROC_ROOT, help = "Where procfs is mounted.")]
    proc_root: PathBuf,

    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE, help = "Largest single read from process memory.")]
    chunk_size: usize,
}

impl Args {
    fn format(&self) -> OutputFormat {
        if self.framed {
            OutputFormat::Framed
        } else {
            OutputFormat::Raw
        }
    }

    /// `None` means every process.
    fn target(&self) -> Result<Option<ProcessId>> {
        if self.pid == 0 {
            return Ok(None);
        }
        ProcessId::new(self.pid)
            .map(Some)
            .with_context(|| format!("{} is not a valid pid", self.pid))
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let target = args.target()?;
    let sink = CaptureSink::create(args.output.as_deref(), args.format())?;
    let procfs = Procfs::new(&args.proc_root);

    let pids = match target {
        Some(pid) => vec![pid],
        None => procfs.pids().unwrap_or_else(|err| {
            error!("failed to list {}: {}", procfs.root().display(), err);
            Vec::new()
        }),
    };

    let tracer = Ptrace::new(args.attach_timeout.map(Duration::from_millis));
    let extractor = Extractor::new(procfs, tracer, ExtractOptions { chunk_size: args.chunk_size });

    let summary = extractor.run_all(pids, &sink).context("capture aborted")?;
    info!(
        "visited {} pids: {} captured, {} failed, {} regions, {} short reads, {} bytes",
        summary.visited,
        summary.captured,
        summary.failed,
        summary.regions_captured,
        summary.short_reads,
        summary.bytes_written
    );

    Ok(())
}
