//! In-memory buffer endpoint: a bounded byte queue useful for testing the
//! converter/server pipeline without touching the filesystem or network,
//! and for embedding this crate's server in a host process that wants to
//! inject/observe bytes directly.

use super::{RateCounter, Stat, Stream, StreamKind, StreamState};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Cloneable handle around a shared byte queue; `write` pushes, `read`
/// pops, so two [`MemBufferStream`] handles constructed from the same
/// [`MemBufferStream::new`] call form a connected pipe.
#[derive(Clone)]
pub struct MemBufferStream {
    queue: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
    mode: super::Mode,
    state: StreamState,
    rate: RateCounter,
}

impl MemBufferStream {
    pub fn new(capacity: usize, mode: super::Mode) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            mode,
            state: StreamState::Closed,
            rate: RateCounter::default(),
        }
    }

    /// Returns a second handle sharing the same underlying queue, the
    /// other end of the pipe.
    pub fn other_end(&self, mode: super::Mode) -> Self {
        Self {
            queue: self.queue.clone(),
            capacity: self.capacity,
            mode,
            state: StreamState::Closed,
            rate: RateCounter::default(),
        }
    }
}

impl Stream for MemBufferStream {
    fn kind(&self) -> StreamKind {
        StreamKind::MemBuffer
    }

    fn open(&mut self) -> Result<(), super::StreamError> {
        self.state = StreamState::Open;
        Ok(())
    }

    fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, super::StreamError> {
        let mut queue = self.queue.lock().unwrap();
        let n = buf.len().min(queue.len());
        for slot in buf.iter_mut().take(n) {
            *slot = queue.pop_front().unwrap();
        }
        drop(queue);
        self.rate.add(n);
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, super::StreamError> {
        let mut queue = self.queue.lock().unwrap();
        let room = self.capacity.saturating_sub(queue.len());
        let n = buf.len().min(room);
        queue.extend(&buf[..n]);
        drop(queue);
        self.rate.add(n);
        Ok(n)
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn stat(&mut self) -> Stat {
        let rate = self.rate.tick();
        match self.mode {
            super::Mode::Read => Stat { in_bytes: self.rate.total(), in_rate_bps: rate, ..Default::default() },
            _ => Stat { out_bytes: self.rate.total(), out_rate_bps: rate, ..Default::default() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_roundtrips_bytes() {
        let mut writer = MemBufferStream::new(64, super::super::Mode::Write);
        let mut reader = writer.other_end(super::super::Mode::Read);
        writer.open().unwrap();
        reader.open().unwrap();

        writer.write(b"abc").unwrap();
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"abc");
    }

    #[test]
    fn write_drops_excess_over_capacity() {
        let mut writer = MemBufferStream::new(4, super::super::Mode::Write);
        writer.open().unwrap();
        let n = writer.write(b"abcdefgh").unwrap();
        assert_eq!(n, 4);
    }
}
