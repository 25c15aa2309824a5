use crate::ProcessId;
use crate::error::SinkError;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

pub const FRAME_MAGIC: [u8; 4] = *b"PMRG";
pub const FRAME_HEADER_LEN: usize = 24;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// bytes only: no lengths, addresses or pid boundaries.
    #[default]
    Raw,

    /// every chunk prefixed by a [`FrameHeader`].
    Framed,
}

/// `magic | pid u32 le | address u64 le | length u64 le`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub pid:     u32,
    pub address: u64,
    pub len:     u64,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0..4].copy_from_slice(&FRAME_MAGIC);
        out[4..8].copy_from_slice(&self.pid.to_le_bytes());
        out[8..16].copy_from_slice(&self.address.to_le_bytes());
        out[16..24].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..FRAME_HEADER_LEN)?;
        if header[0..4] != FRAME_MAGIC {
            return None;
        }
        Some(Self {
            pid:     u32::from_le_bytes(header[4..8].try_into().ok()?),
            address: u64::from_le_bytes(header[8..16].try_into().ok()?),
            len:     u64::from_le_bytes(header[16..24].try_into().ok()?),
        })
    }
}

/// append-only destination shared by every pid in a run. each append
/// holds the lock for its whole record, so the bytes of one chunk are
/// always contiguous.
pub struct CaptureSink<W> {
    writer: Mutex<W>,
    format: OutputFormat,
}

impl CaptureSink<Box<dyn Write + Send>> {
    /// open `path` for writing, or stdout when there is none.
    pub fn create(path: Option<&Path>, format: OutputFormat) -> Result<Self, SinkError> {
        let writer: Box<dyn Write + Send> = match path {
            Some(path) => {
                let file = File::create(path).map_err(|source| SinkError::OpenFailed {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!("writing to: {}", path.display());
                Box::new(BufWriter::new(file))
            }
            None => Box::new(BufWriter::new(io::stdout())),
        };
        Ok(Self::new(writer, format))
    }
}

impl<W: Write> CaptureSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// append the bytes read from `address` in `pid`.
    pub fn append(&self, pid: ProcessId, address: u64, bytes: &[u8]) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        if self.format == OutputFormat::Framed {
            let header = FrameHeader {
                pid: pid.get(),
                address,
                len: bytes.len() as u64,
            };
            writer.write_all(&header.encode()).map_err(SinkError::WriteFailed)?;
        }
        writer.write_all(bytes).map_err(SinkError::WriteFailed)
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .map_err(SinkError::WriteFailed)
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: u32) -> ProcessId {
        ProcessId::new(raw).unwrap()
    }

    #[test]
    fn raw_is_plain_concatenation() {
        let sink = CaptureSink::new(Vec::new(), OutputFormat::Raw);
        sink.append(pid(1), 0x1000, &[1, 2]).unwrap();
        sink.append(pid(2), 0x9000, &[3]).unwrap();
        assert_eq!(sink.into_inner(), vec![1u8, 2, 3]);
    }

    #[test]
    fn framed_prefixes_each_record() {
        let sink = CaptureSink::new(Vec::new(), OutputFormat::Framed);
        sink.append(pid(42), 0x7ffd_0000, b"abc").unwrap();
        let out = sink.into_inner();

        assert_eq!(out.len(), FRAME_HEADER_LEN + 3);
        let header = FrameHeader::decode(&out).unwrap();
        assert_eq!(header, FrameHeader { pid: 42, address: 0x7ffd_0000, len: 3 });
        assert_eq!(&out[FRAME_HEADER_LEN..], b"abc");
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut header = FrameHeader { pid: 1, address: 2, len: 3 }.encode();
        header[0] = b'X';
        assert_eq!(FrameHeader::decode(&header), None);
        assert_eq!(FrameHeader::decode(&header[..10]), None);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failure_is_reported() {
        let sink = CaptureSink::new(BrokenPipe, OutputFormat::Raw);
        assert!(matches!(sink.append(pid(1), 0, b"x"), Err(SinkError::WriteFailed(_))));
    }

    #[test]
    fn create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.bin");
        let err = CaptureSink::create(Some(path.as_path()), OutputFormat::Raw).err().unwrap();
        assert!(matches!(err, SinkError::OpenFailed { .. }));
    }

    #[test]
    fn create_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let sink = CaptureSink::create(Some(path.as_path()), OutputFormat::Raw).unwrap();
        sink.append(pid(1), 0, b"hello").unwrap();
        sink.flush().unwrap();
        drop(sink);
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
