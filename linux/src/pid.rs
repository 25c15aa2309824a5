use nix::unistd::Pid;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

/// id of a target process. always positive, zero is never a valid target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(NonZeroU32);

impl ProcessId {
    /// `None` for zero and for anything outside the kernel's `pid_t` range.
    pub fn new(raw: u32) -> Option<Self> {
        if raw > i32::MAX as u32 {
            return None;
        }
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// pid of the calling process.
    pub fn current() -> Self {
        // the kernel never hands out pid 0 to a user process
        Self::new(std::process::id()).unwrap_or(Self(NonZeroU32::MIN))
    }
}

impl From<ProcessId> for Pid {
    fn from(pid: ProcessId) -> Self {
        Pid::from_raw(pid.get() as i32)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{0}` is not a process id")]
pub struct ParsePidError(String);

impl FromStr for ProcessId {
    type Err = ParsePidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .and_then(ProcessId::new)
            .ok_or_else(|| ParsePidError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_not_a_pid() {
        assert_eq!(ProcessId::new(0), None);
        assert!("0".parse::<ProcessId>().is_err());
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(ProcessId::new(u32::MAX), None);
        assert!("-3".parse::<ProcessId>().is_err());
        assert!("12abc".parse::<ProcessId>().is_err());
    }

    #[test]
    fn converts_to_nix_pid() {
        let pid: ProcessId = "4242".parse().unwrap();
        assert_eq!(Pid::from(pid), Pid::from_raw(4242));
        assert_eq!(pid.to_string(), "4242");
    }
}
