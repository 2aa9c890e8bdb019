//! Wire protocol between the forked child and its parent
//!
//! One message per call: an ASCII tag, a colon, the payload and a single NUL.
//!
//! ```text
//! ok:<json>\0      the logic's result, encoded with serde_json
//! err:<text>\0     a human-readable error description
//! ```
//!
//! JSON never contains a raw NUL and error text has its NULs replaced, so the
//! first NUL is always the terminator.

use crate::{raw, NsForkError, Result};
use nix::errno::Errno;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::os::unix::io::RawFd;

/// Message terminator
pub const SENTINEL: u8 = 0;

pub const OK_TAG: &[u8] = b"ok:";
pub const ERR_TAG: &[u8] = b"err:";

/// Default starting size of the parent's read buffer
pub const DEFAULT_READ_BUFFER: usize = 256;

/// Encode the outcome of the caller's logic.
///
/// A value that fails to serialize is reported as an error message.
pub fn encode<T: Serialize, E: Display>(outcome: &std::result::Result<T, E>) -> Vec<u8> {
    match outcome {
        Ok(value) => encode_ok(value),
        Err(e) => encode_err(e),
    }
}

pub fn encode_ok<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    let mut msg = OK_TAG.to_vec();
    match serde_json::to_writer(&mut msg, value) {
        Ok(()) => {
            msg.push(SENTINEL);
            msg
        }
        Err(e) => encode_err(&e),
    }
}

pub fn encode_err<E: Display + ?Sized>(error: &E) -> Vec<u8> {
    let mut msg = format!("err:{error}").into_bytes();
    for b in &mut msg[ERR_TAG.len()..] {
        if *b == SENTINEL {
            *b = b' ';
        }
    }
    msg.push(SENTINEL);
    msg
}

/// Read one message from `fd`.
///
/// Stops once a NUL has arrived or the writer has closed its end. The buffer
/// starts at `initial_capacity` bytes and doubles whenever it fills up. The
/// returned bytes are not validated; see [`decode`].
pub fn read_message(fd: RawFd, initial_capacity: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; initial_capacity.max(1)];
    let mut filled = 0;

    loop {
        if filled == buf.len() {
            buf.resize(buf.len() * 2, 0);
        }
        let n = match raw::read(fd, &mut buf[filled..]) {
            Ok(n) => n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::error!(error = %e, "failed to read from namespace pipe");
                return Err(NsForkError::Read(e));
            }
        };
        let terminated = buf[filled..filled + n].contains(&SENTINEL);
        filled += n;
        if n == 0 || terminated {
            break;
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

/// Decode a complete message into the caller's result type.
pub fn decode<T: DeserializeOwned>(message: &[u8]) -> Result<T> {
    let body = match message.split_last() {
        Some((&SENTINEL, body)) => body,
        _ => return Err(NsForkError::InvalidTermination),
    };

    if let Some(text) = body.strip_prefix(ERR_TAG) {
        return Err(NsForkError::from_remote(
            String::from_utf8_lossy(text).into_owned(),
        ));
    }
    if let Some(payload) = body.strip_prefix(OK_TAG) {
        return Ok(serde_json::from_slice(payload)?);
    }
    Err(NsForkError::UnknownResponse(
        String::from_utf8_lossy(body).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::os::fd::AsRawFd;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Count {
        count: u32,
    }

    #[test]
    fn test_encode_ok() {
        let msg = encode::<_, String>(&Ok(Count { count: 42 }));
        assert_eq!(msg, b"ok:{\"count\":42}\0");
    }

    #[test]
    fn test_encode_err_replaces_nul() {
        let msg = encode::<Count, _>(&Err("bad\0name"));
        assert_eq!(msg, b"err:bad name\0");
    }

    #[test]
    fn test_encode_unserializable_value() {
        // JSON object keys must be strings
        let mut map = HashMap::new();
        map.insert((1, 2), "x");
        let msg = encode_ok(&map);
        assert!(msg.starts_with(ERR_TAG));
        assert_eq!(msg.last(), Some(&SENTINEL));
    }

    #[test]
    fn test_decode_ok() {
        let value: Count = decode(b"ok:{\"count\":42}\0").unwrap();
        assert_eq!(value, Count { count: 42 });
    }

    #[test]
    fn test_decode_err() {
        let err = decode::<Count>(b"err:disk not found\0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
        assert_eq!(err.to_string(), "disk not found");
    }

    #[test]
    fn test_decode_missing_sentinel() {
        let err = decode::<Count>(b"ok:{\"count\":42}").unwrap_err();
        assert!(matches!(err, NsForkError::InvalidTermination));
        assert!(err.to_string().contains("invalid termination character"));
    }

    #[test]
    fn test_decode_empty() {
        let err = decode::<Count>(b"").unwrap_err();
        assert!(matches!(err, NsForkError::InvalidTermination));
    }

    #[test]
    fn test_decode_unknown_tag() {
        let err = decode::<Count>(b"maybe:1\0").unwrap_err();
        assert!(matches!(err, NsForkError::UnknownResponse(ref s) if s == "maybe:1"));
    }

    #[test]
    fn test_decode_wrong_shape() {
        let err = decode::<Count>(b"ok:[1,2]\0").unwrap_err();
        assert!(matches!(err, NsForkError::Decode(_)));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_decode_unit() {
        let msg = encode_ok(&());
        decode::<()>(&msg).unwrap();
    }

    #[test]
    fn test_read_message_grows_buffer() {
        let (r, w) = nix::unistd::pipe().unwrap();
        let payload: Vec<String> = (0..500).map(|i| format!("entry-{i}")).collect();
        let msg = encode_ok(&payload);
        let expected = msg.clone();

        let writer = std::thread::spawn(move || {
            raw::write_all(w.as_raw_fd(), &msg);
            drop(w);
        });
        let read = read_message(r.as_raw_fd(), 4).unwrap();
        writer.join().unwrap();

        assert_eq!(read, expected);
        let decoded: Vec<String> = decode(&read).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_read_message_stops_at_eof() {
        let (r, w) = nix::unistd::pipe().unwrap();
        raw::write_all(w.as_raw_fd(), b"ok:{\"count\":42}");
        drop(w);

        let read = read_message(r.as_raw_fd(), DEFAULT_READ_BUFFER).unwrap();
        assert_eq!(read, b"ok:{\"count\":42}");
        assert!(matches!(
            decode::<Count>(&read),
            Err(NsForkError::InvalidTermination)
        ));
    }

    #[test]
    fn test_read_message_bad_fd() {
        let err = read_message(-1, 8).unwrap_err();
        assert!(matches!(err, NsForkError::Read(Errno::EBADF)));
    }
}
