//! Byte-count progress reporting for file transfers.

use std::io::{self, Read};

/// Wraps a reader and reports `(transferred, total)` after every read.
pub struct ProgressReader<'a, R> {
    inner: R,
    transferred: u64,
    total: u64,
    on_progress: &'a mut dyn FnMut(u64, u64),
}

impl<'a, R: Read> ProgressReader<'a, R> {
    /// Wraps `inner`, whose full length is `total` bytes.
    #[must_use]
    pub const fn new(inner: R, total: u64, on_progress: &'a mut dyn FnMut(u64, u64)) -> Self {
        Self {
            inner,
            transferred: 0,
            total,
            on_progress,
        }
    }

    /// Bytes read so far.
    #[must_use]
    pub const fn transferred(&self) -> u64 {
        self.transferred
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 {
            self.transferred = self.transferred.saturating_add(read as u64);
            (self.on_progress)(self.transferred, self.total);
        }
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::ProgressReader;

    #[test]
    fn reports_cumulative_progress_for_each_read() {
        let data = vec![7_u8; 10];
        let mut seen = Vec::new();
        let mut record = |done: u64, total: u64| seen.push((done, total));
        let mut reader = ProgressReader::new(Cursor::new(data), 10, &mut record);

        let mut buf = [0_u8; 4];
        while reader.read(&mut buf).unwrap_or_else(|err| panic!("read: {err}")) > 0 {}
        assert_eq!(reader.transferred(), 10);
        drop(reader);

        assert_eq!(seen, vec![(4, 10), (8, 10), (10, 10)]);
    }

    #[test]
    fn empty_source_reports_nothing() {
        let mut calls = 0_u32;
        let mut record = |_: u64, _: u64| calls += 1;
        let mut reader = ProgressReader::new(Cursor::new(Vec::new()), 0, &mut record);

        let mut sink = Vec::new();
        reader
            .read_to_end(&mut sink)
            .unwrap_or_else(|err| panic!("read: {err}"));
        drop(reader);

        assert_eq!(calls, 0);
    }
}
