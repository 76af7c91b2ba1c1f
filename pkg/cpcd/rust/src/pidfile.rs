// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-process pid files holding the decimal process-group id.
//!
//! The child writes `<path>.tmp` and renames it over `<path>` before exec, so
//! a reader never observes a partial file.

use std::ffi::CString;
use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use log::warn;

use crate::error::SpawnError;

/// Longest accepted pid file body, not counting a trailing newline.
const MAX_PID_DIGITS: usize = 10;

/// Read a pid file. A missing file yields `None`; so does a malformed one,
/// which is logged.
pub fn read(path: &Path) -> io::Result<Option<u32>> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let pid = parse(&contents);
    if pid.is_none() {
        warn!(
            "ignoring malformed pid file {}: {:?}",
            path.display(),
            String::from_utf8_lossy(&contents)
        );
    }
    Ok(pid)
}

fn parse(contents: &[u8]) -> Option<u32> {
    let digits = contents.strip_suffix(b"\n").unwrap_or(contents);
    if digits.is_empty() || digits.len() > MAX_PID_DIGITS || !digits.iter().all(u8::is_ascii_digit)
    {
        return None;
    }
    let pid: u32 = std::str::from_utf8(digits).ok()?.parse().ok()?;
    (pid > 1 && pid <= i32::MAX as u32).then_some(pid)
}

/// Remove a pid file, treating "not found" as success.
pub fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Child-side writer. All paths are prepared in the parent so that
/// [`PidFileWriter::write_own_pgid`] can run between fork and exec.
#[derive(Debug)]
pub(crate) struct PidFileWriter {
    tmp: CString,
    target: CString,
}

impl PidFileWriter {
    pub(crate) fn new(path: &Path) -> Result<Self, SpawnError> {
        let target = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| SpawnError::InvalidString(path.display().to_string()))?;
        let mut tmp = path.as_os_str().as_bytes().to_vec();
        tmp.extend_from_slice(b".tmp");
        let tmp = CString::new(tmp)
            .map_err(|_| SpawnError::InvalidString(path.display().to_string()))?;
        Ok(Self { tmp, target })
    }

    /// Write the calling process's group id. Async-signal-safe: no
    /// allocation, only raw syscalls.
    pub(crate) fn write_own_pgid(&self) -> io::Result<()> {
        // SAFETY: getpgrp has no preconditions.
        let pgid = unsafe { libc::getpgrp() };
        let mut buf = [0u8; MAX_PID_DIGITS + 1];
        let len = format_decimal(pgid as u32, &mut buf);

        // SAFETY: the path is a valid NUL-terminated string.
        let fd = unsafe {
            libc::open(
                self.tmp.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC | libc::O_CLOEXEC,
                0o644 as libc::c_uint,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `buf[..len]` is initialized and `fd` is open.
        let written = unsafe { libc::write(fd, buf.as_ptr().cast(), len) };
        let write_err = (written != len as isize).then(io::Error::last_os_error);
        // SAFETY: `fd` is open and owned here.
        unsafe { libc::close(fd) };
        if let Some(e) = write_err {
            return Err(e);
        }
        // SAFETY: both paths are valid NUL-terminated strings.
        if unsafe { libc::rename(self.tmp.as_ptr(), self.target.as_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Render `value` followed by a newline into `buf`, returning the length.
fn format_decimal(mut value: u32, buf: &mut [u8; MAX_PID_DIGITS + 1]) -> usize {
    let mut digits = [0u8; MAX_PID_DIGITS];
    let mut n = 0;
    loop {
        digits[n] = b'0' + (value % 10) as u8;
        n += 1;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    for (dst, src) in buf.iter_mut().zip(digits[..n].iter().rev()) {
        *dst = *src;
    }
    buf[n] = b'\n';
    n + 1
}
