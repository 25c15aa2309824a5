use log::debug;
use std::fmt;
use std::io::{self, BufRead};

/// one line of /proc/<pid>/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// start addr of the mapping address block.
    pub start:  u64,

    /// end addr of the mapping address block, exclusive.
    pub end:    u64,

    /// permissions as written by the kernel, e.g. `rw-p`. empty if absent.
    pub perms:  String,

    /// everything after the metadata fields: a pathname, a pseudo-name
    /// such as `[heap]`, or empty for anonymous mappings.
    pub label:  String,
}

impl MemoryRegion {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// parse a single maps line. `None` unless it starts with a `start-end`
    /// hex pair where `start <= end`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\n', '\r']);

        let addr_block = next_field(&mut rest)?;
        let (start, end) = addr_block.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        if start > end {
            return None;
        }

        // perms, offset, device, inode
        let perms = next_field(&mut rest).unwrap_or_default().to_string();
        for _ in 0..3 {
            next_field(&mut rest);
        }

        Some(Self {
            start,
            end,
            perms,
            label: rest.trim().to_string(),
        })
    }
}

impl fmt::Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:x} {} {}", self.start, self.end, self.perms, self.label)
    }
}

/// split the next whitespace-separated field off the front of `rest`.
fn next_field<'a>(rest: &mut &'a str) -> Option<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        *rest = trimmed;
        return None;
    }
    let (field, tail) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    *rest = tail;
    Some(field)
}

/// lazy reader over a maps description. malformed lines are skipped,
/// end of input ends the sequence, an I/O error is yielded once and
/// then the sequence is over.
pub struct Regions<R> {
    reader:  R,
    buffer:  Vec<u8>,
    skipped: usize,
    done:    bool,
}

impl<R: BufRead> Regions<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(0x100),
            skipped: 0,
            done: false,
        }
    }

    /// number of lines skipped as malformed so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for Regions<R> {
    type Item = io::Result<MemoryRegion>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    // pathnames are not guaranteed to be utf-8
                    let line = String::from_utf8_lossy(&self.buffer);
                    match MemoryRegion::parse(&line) {
                        Some(region) => return Some(Ok(region)),
                        None => {
                            if !line.trim().is_empty() {
                                debug!("skipping malformed maps line: {}", line.trim_end());
                            }
                            self.skipped += 1;
                        }
                    }
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Read};

    fn collect(text: &str) -> Vec<MemoryRegion> {
        Regions::new(Cursor::new(text))
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn parses_full_line() {
        let region = MemoryRegion::parse(
            "55d0c2a4e000-55d0c2a6f000 rw-p 00000000 00:00 0                          [heap]\n",
        )
        .unwrap();
        assert_eq!(region.start, 0x55d0c2a4e000);
        assert_eq!(region.end, 0x55d0c2a6f000);
        assert_eq!(region.perms, "rw-p");
        assert_eq!(region.label, "[heap]");
        assert_eq!(region.len(), 0x21000);
    }

    #[test]
    fn anonymous_mapping_has_empty_label() {
        let region = MemoryRegion::parse("7f0000000000-7f0000001000 rw-p 00000000 00:00 0").unwrap();
        assert_eq!(region.label, "");
    }

    #[test]
    fn label_keeps_inner_spaces() {
        let region = MemoryRegion::parse(
            "7f00-8f00 rw-s 00000000 00:05 1234   /dev/shm/my file (deleted)",
        )
        .unwrap();
        assert_eq!(region.label, "/dev/shm/my file (deleted)");
    }

    #[test]
    fn label_is_not_length_limited() {
        let long = format!("/{}", "a".repeat(10_000));
        let region = MemoryRegion::parse(&format!("1000-2000 r--p 00000000 08:01 42 {long}")).unwrap();
        assert_eq!(region.label, long);
    }

    #[test]
    fn bare_range_is_accepted() {
        let region = MemoryRegion::parse("1000-1000").unwrap();
        assert!(region.is_empty());
        assert_eq!(region.perms, "");
        assert_eq!(region.label, "");
    }

    #[test]
    fn rejects_bad_ranges() {
        assert_eq!(MemoryRegion::parse("garbage"), None);
        assert_eq!(MemoryRegion::parse("zz00-1000 rw-p 0 0 0 [heap]"), None);
        assert_eq!(MemoryRegion::parse("2000-1000 rw-p 0 0 0 [heap]"), None);
        assert_eq!(MemoryRegion::parse("1000 rw-p 0 0 0 [heap]"), None);
        assert_eq!(MemoryRegion::parse(""), None);
    }

    #[test]
    fn skips_malformed_lines_and_continues() {
        let text = "1000-2000 rw-p 00000000 00:00 0 [heap]\n\
                    this is not a mapping\n\
                    \n\
                    3000-4000 rw-p 00000000 00:00 0 [stack]\n";
        let mut regions = Regions::new(Cursor::new(text));
        let labels: Vec<String> = regions.by_ref().map(|r| r.unwrap().label).collect();
        assert_eq!(labels, ["[heap]", "[stack]"]);
        assert_eq!(regions.skipped(), 2);
    }

    #[test]
    fn last_line_without_newline() {
        let regions = collect("1000-2000 rw-p 00000000 00:00 0 [heap]");
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn empty_input_is_empty_sequence() {
        assert!(collect("").is_empty());
    }

    #[test]
    fn non_utf8_pathname() {
        let mut bytes = b"1000-2000 r--p 00000000 08:01 42 /tmp/\xff\xfe (deleted)\n".to_vec();
        bytes.extend_from_slice(b"3000-4000 rw-p 00000000 00:00 0 [heap]\n");
        let regions: Vec<_> = Regions::new(Cursor::new(bytes)).map(Result::unwrap).collect();
        assert_eq!(regions.len(), 2);
        assert!(regions[0].label.ends_with("(deleted)"));
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("boom"))
        }
    }

    #[test]
    fn io_error_is_yielded_once() {
        let mut regions = Regions::new(BufReader::new(FailingReader));
        assert!(matches!(regions.next(), Some(Err(_))));
        assert!(regions.next().is_none());
    }
}
