/// POSIX-style identity of a peer, passed through without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PosixCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: u32,
}

impl PosixCredentials {
    pub fn new(uid: u32, gid: u32, pid: u32) -> Self {
        Self { uid, gid, pid }
    }

    /// Credentials of the calling process.
    #[cfg(unix)]
    pub fn current() -> Self {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self {
            uid,
            gid,
            pid: std::process::id(),
        }
    }

    /// Credentials of the calling process.
    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self {
            uid: 0,
            gid: 0,
            pid: std::process::id(),
        }
    }
}

impl Default for PosixCredentials {
    fn default() -> Self {
        Self::current()
    }
}
