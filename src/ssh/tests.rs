//! Unit tests for command output draining and transfer cleanup.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read};

use super::{SshError, SshErrorKind, copy_or_discard, drain_streams};

/// Reader that replays a fixed sequence of read outcomes.
struct Replay(VecDeque<io::Result<Vec<u8>>>);

impl Replay {
    fn new(steps: impl IntoIterator<Item = io::Result<Vec<u8>>>) -> Self {
        Self(steps.into_iter().collect())
    }
}

impl Read for Replay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.pop_front() {
            None => Ok(0),
            Some(Err(err)) => Err(err),
            Some(Ok(chunk)) => {
                let len = chunk.len().min(buf.len());
                if let (Some(dst), Some(src)) = (buf.get_mut(..len), chunk.get(..len)) {
                    dst.copy_from_slice(src);
                }
                Ok(len)
            }
        }
    }
}

fn would_block() -> io::Error {
    io::Error::from(io::ErrorKind::WouldBlock)
}

#[test]
fn drain_collects_both_streams_when_stderr_is_large() {
    let noisy = "warning: retrying mirror\n".repeat(8_000);
    let mut stdout = Cursor::new(b"installed\n".to_vec());
    let mut stderr = Cursor::new(noisy.clone().into_bytes());

    let (out, err) = drain_streams(&mut stdout, &mut stderr, || true)
        .unwrap_or_else(|err| panic!("drain failed: {err}"));

    assert_eq!(out, "installed\n");
    assert_eq!(err.len(), noisy.len());
}

#[test]
fn drain_waits_out_silent_stretches_until_eof() {
    let mut stdout = Replay::new([
        Err(would_block()),
        Err(would_block()),
        Ok(b"host_id = abc-123\n".to_vec()),
    ]);
    let mut stderr = Replay::new([Err(would_block()), Ok(b"done\n".to_vec())]);
    let polls = Cell::new(0_u32);

    let (out, err) = drain_streams(&mut stdout, &mut stderr, || {
        polls.set(polls.get() + 1);
        polls.get() > 1
    })
    .unwrap_or_else(|err| panic!("drain failed: {err}"));

    assert_eq!(out, "host_id = abc-123\n");
    assert_eq!(err, "done\n");
}

#[test]
fn drain_surfaces_hard_read_errors() {
    let mut stdout = Replay::new([Err(io::Error::from(io::ErrorKind::ConnectionReset))]);
    let mut stderr = Cursor::new(Vec::new());

    let err = drain_streams(&mut stdout, &mut stderr, || true).err();

    assert_eq!(err.as_ref().map(io::Error::kind), Some(io::ErrorKind::ConnectionReset));
}

#[test]
fn failed_transfer_discards_the_partial_destination() {
    let mut source = Replay::new([
        Ok(b"#!/bin/bash\n".to_vec()),
        Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
    ]);
    let discarded = Cell::new(false);

    let err = copy_or_discard(&mut source, Vec::new(), "/tmp/installer.sh", || {
        discarded.set(true);
        Ok(())
    })
    .err();

    assert!(discarded.get());
    assert_eq!(err.as_ref().map(SshError::kind), Some(SshErrorKind::SftpFailed));
}

#[test]
fn failed_cleanup_still_reports_the_transfer_error() {
    let mut source = Replay::new([Err(io::Error::from(io::ErrorKind::BrokenPipe))]);

    let err = copy_or_discard(&mut source, Vec::new(), "/tmp/installer.sh", || {
        Err(io::Error::from(io::ErrorKind::PermissionDenied))
    })
    .err();

    assert!(
        err.is_some_and(|failure| failure.to_string().starts_with("sftp transfer of /tmp/installer.sh failed")),
    );
}

#[test]
fn successful_transfer_keeps_the_destination() {
    let mut source = Cursor::new(b"payload".to_vec());
    let discarded = Cell::new(false);

    let copied = copy_or_discard(&mut source, Vec::new(), "/tmp/payload", || {
        discarded.set(true);
        Ok(())
    })
    .unwrap_or_else(|err| panic!("copy failed: {err}"));

    assert_eq!(copied, 7);
    assert!(!discarded.get());
}
