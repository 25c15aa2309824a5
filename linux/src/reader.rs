use crate::error::{ReadError, ShortReadCause};
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

/// positioned, possibly short, reads.
pub trait ReadAt {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(self, buf, offset)
    }
}

/// reader over /proc/<pid>/mem. only meaningful while the pid is attached.
pub struct MemoryReader<R = File> {
    source: R,
}

impl<R: ReadAt> MemoryReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// read exactly `len` bytes starting at `address`.
    ///
    /// a single `read_at` may come back short, so this keeps reading until
    /// `len` bytes are in hand. if the source reports end of data or an
    /// error first, the bytes obtained so far are returned inside
    /// [`ReadError::ShortRead`], never padded.
    pub fn read(&self, address: u64, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut buf = vec![0u8; len];
        let (filled, cause) = self.fill(address, &mut buf);

        match cause {
            None => Ok(buf),
            Some(cause) => {
                buf.truncate(filled);
                Err(ReadError::ShortRead {
                    address,
                    requested: len,
                    bytes: buf,
                    cause,
                })
            }
        }
    }

    fn fill(&self, address: u64, buf: &mut [u8]) -> (usize, Option<ShortReadCause>) {
        let mut filled = 0;
        while filled < buf.len() {
            match self.source.read_at(&mut buf[filled..], address + filled as u64) {
                Ok(0) => return (filled, Some(ShortReadCause::EndOfData)),
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return (filled, Some(ShortReadCause::Fault(err))),
            }
        }
        (filled, None)
    }
}
