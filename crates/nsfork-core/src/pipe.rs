//! Result pipe between a namespace child and its parent

use crate::{protocol, raw, NsForkError, Result};
use nix::fcntl::OFlag;
use std::os::unix::io::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

/// Both ends of a fresh pipe, before the fork splits them up
#[derive(Debug)]
pub struct ResultPipe {
    /// Parent reads the result here
    read: OwnedFd,
    /// Child writes the result here
    write: OwnedFd,
}

impl ResultPipe {
    /// Create a close-on-exec pipe
    pub fn new() -> Result<Self> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(NsForkError::Pipe)?;
        Ok(Self { read, write })
    }

    /// Keep the read end, closing this process's copy of the write end.
    ///
    /// Without this the reader never sees EOF if the child dies early.
    #[must_use]
    pub fn into_parent(self) -> ParentEnd {
        drop(self.write);
        ParentEnd { fd: self.read }
    }

    /// Keep the write end, closing this process's copy of the read end.
    ///
    /// Descriptors are released with raw `close`, not through `Drop`.
    #[must_use]
    pub fn into_child(self) -> ChildEnd {
        let _ = raw::close(self.read.into_raw_fd());
        ChildEnd {
            fd: self.write.into_raw_fd(),
        }
    }
}

/// Parent's read end
#[derive(Debug)]
pub struct ParentEnd {
    fd: OwnedFd,
}

impl ParentEnd {
    /// Read one full message; see [`protocol::read_message`].
    pub fn read_message(&self, initial_capacity: usize) -> Result<Vec<u8>> {
        protocol::read_message(self.fd.as_raw_fd(), initial_capacity)
    }
}

impl AsRawFd for ParentEnd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Child's write end
#[derive(Debug)]
pub struct ChildEnd {
    fd: RawFd,
}

impl ChildEnd {
    /// Write `message` fully, then close the pipe.
    ///
    /// Write errors are ignored: the child is about to exit either way and the
    /// parent reports a short message as a protocol error.
    pub fn send(self, message: &[u8]) {
        raw::write_all(self.fd, message);
        let _ = raw::close(self.fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_in_one_process() {
        let pipe = ResultPipe::new().unwrap();
        let ResultPipe { read, write } = pipe;
        let child = ChildEnd {
            fd: write.into_raw_fd(),
        };
        let parent = ParentEnd { fd: read };

        child.send(&protocol::encode_ok(&7u8));
        let msg = parent.read_message(2).unwrap();
        assert_eq!(protocol::decode::<u8>(&msg).unwrap(), 7);
    }

    #[test]
    fn test_parent_sees_eof_when_writer_closes() {
        let parent = ResultPipe::new().unwrap().into_parent();
        // into_parent closed the only write end
        assert!(parent.read_message(16).unwrap().is_empty());
    }
}
