//! Unbuffered syscall wrappers for the forked child
//!
//! After `fork` only the calling thread exists in the child. Every function
//! here wraps exactly one kernel call and does not retry, buffer, log or
//! allocate, so the child can use them before it exits. `read` and `write`
//! may transfer fewer bytes than asked for; callers loop.

#![allow(unsafe_code)]

use nix::errno::Errno;
use nix::sched::CloneFlags;
use std::ffi::CStr;
use std::os::unix::io::RawFd;

/// read(2)
pub fn read(fd: RawFd, buf: &mut [u8]) -> nix::Result<usize> {
    // SAFETY: buf is valid for buf.len() bytes of writes
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    Errno::result(ret).map(isize::unsigned_abs)
}

/// write(2)
pub fn write(fd: RawFd, buf: &[u8]) -> nix::Result<usize> {
    // SAFETY: buf is valid for buf.len() bytes of reads
    let ret = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    Errno::result(ret).map(isize::unsigned_abs)
}

/// open(2). `O_CLOEXEC` is always added.
pub fn open(path: &CStr, flags: libc::c_int, mode: libc::mode_t) -> nix::Result<RawFd> {
    // SAFETY: path is NUL-terminated and outlives the call
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            flags | libc::O_CLOEXEC,
            libc::c_uint::from(mode),
        )
    };
    Errno::result(fd)
}

/// close(2)
pub fn close(fd: RawFd) -> nix::Result<()> {
    // SAFETY: closing a descriptor has no memory effects
    let ret = unsafe { libc::close(fd) };
    Errno::result(ret).map(drop)
}

/// setns(2): move the calling process into the namespace behind `fd`.
pub fn setns(fd: RawFd, kind: CloneFlags) -> nix::Result<()> {
    // SAFETY: setns takes plain integers
    let ret = unsafe { libc::setns(fd, kind.bits()) };
    Errno::result(ret).map(drop)
}

/// Write all of `buf`, stopping at the first error or zero-length write.
///
/// Returns the number of bytes written.
pub fn write_all(fd: RawFd, buf: &[u8]) -> usize {
    let mut written = 0;
    while written < buf.len() {
        match write(fd, &buf[written..]) {
            Ok(0) | Err(_) => break,
            Ok(n) => written += n,
        }
    }
    written
}

/// _exit(2): terminate now, skipping atexit handlers and destructors.
pub fn exit_immediately(code: libc::c_int) -> ! {
    // SAFETY: _exit never returns and touches no process memory
    unsafe { libc::_exit(code) }
}
