use crate::error::{MapOpenError, ReadError};
use crate::{MemoryReader, ProcessId, Regions};
use log::debug;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// handle on a proc filesystem mounted at `root`.
#[derive(Debug, Clone)]
pub struct Procfs {
    root: PathBuf,
}

impl Default for Procfs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl Procfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn maps_path(&self, pid: ProcessId) -> PathBuf {
        self.root.join(pid.to_string()).join("maps")
    }

    pub fn mem_path(&self, pid: ProcessId) -> PathBuf {
        self.root.join(pid.to_string()).join("mem")
    }

    /// open /proc/<pid>/maps as a lazy region sequence.
    pub fn open_maps(&self, pid: ProcessId) -> Result<Regions<BufReader<File>>, MapOpenError> {
        let path = self.maps_path(pid);
        match File::open(&path) {
            Ok(file) => Ok(Regions::new(BufReader::new(file))),
            Err(source) => Err(MapOpenError { path, source }),
        }
    }

    /// open /proc/<pid>/mem for positioned reads.
    pub fn open_mem(&self, pid: ProcessId) -> Result<MemoryReader<File>, ReadError> {
        let path = self.mem_path(pid);
        match File::open(&path) {
            Ok(file) => Ok(MemoryReader::new(file)),
            Err(source) => Err(ReadError::OpenFailed { path, source }),
        }
    }

    /// every pid visible under the root, ascending, excluding the caller.
    pub fn pids(&self) -> io::Result<Vec<ProcessId>> {
        let names = fs::read_dir(&self.root)?
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok());

        let own = ProcessId::current();
        let mut pids: Vec<ProcessId> = parse_pids(names)
            .filter(|pid| {
                if *pid == own {
                    debug!("skipping own pid {}", pid);
                    return false;
                }
                true
            })
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }
}

/// keep the entries that name a pid. non-numeric and zero entries are
/// not pids and are dropped silently.
pub fn parse_pids<I, S>(names: I) -> impl Iterator<Item = ProcessId>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().filter_map(|name| name.as_ref().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pids_skips_non_pids() {
        let pids: Vec<u32> = parse_pids(["1", "two", "0", "42"]).map(ProcessId::get).collect();
        assert_eq!(pids, [1, 42]);
    }

    #[test]
    fn paths_follow_root() {
        let procfs = Procfs::new("/mnt/proc");
        let pid = ProcessId::new(99).unwrap();
        assert_eq!(procfs.maps_path(pid), Path::new("/mnt/proc/99/maps"));
        assert_eq!(procfs.mem_path(pid), Path::new("/mnt/proc/99/mem"));
    }

    #[test]
    fn lists_numeric_entries_sorted() {
        let root = tempfile::tempdir().unwrap();
        for name in ["300", "self", "12", "0", "7", "sys"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        let own = ProcessId::current().to_string();
        fs::create_dir_all(root.path().join(&own)).unwrap();

        let pids: Vec<u32> = Procfs::new(root.path()).pids().unwrap().into_iter().map(ProcessId::get).collect();
        assert!(!pids.contains(&ProcessId::current().get()));
        let expected: Vec<u32> = [7, 12, 300]
            .into_iter()
            .filter(|p| *p != ProcessId::current().get())
            .collect();
        assert_eq!(pids, expected);
    }

    #[test]
    fn missing_maps_is_map_open_error() {
        let root = tempfile::tempdir().unwrap();
        let pid = ProcessId::new(5).unwrap();
        let err = Procfs::new(root.path()).open_maps(pid).err().unwrap();
        assert_eq!(err.path, root.path().join("5/maps"));
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn missing_mem_is_open_failed() {
        let root = tempfile::tempdir().unwrap();
        let pid = ProcessId::new(5).unwrap();
        let err = Procfs::new(root.path()).open_mem(pid).err().unwrap();
        assert!(matches!(err, ReadError::OpenFailed { .. }));
    }
}
