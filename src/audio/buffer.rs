//! Append-only session buffer
//!
//! Every sample captured during a session lands here exactly once. Takes are
//! offset ranges into this buffer, so nothing is ever removed or rewritten:
//! the buffer only grows, and once sealed it stops growing.
//!
//! Readers snapshot `len()` and may then read any range below it; later
//! appends never touch indices below an observed length.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("session buffer is sealed")]
    Sealed,
}

/// Shared handle to the session's audio buffer
#[derive(Clone)]
pub struct SessionBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    samples: RwLock<Vec<i16>>,
    sealed: AtomicBool,
    sample_rate: u32,
    channels: u16,
}

impl SessionBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self::with_capacity(sample_rate, channels, sample_rate as usize * channels as usize)
    }

    pub fn with_capacity(sample_rate: u32, channels: u16, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                samples: RwLock::new(Vec::with_capacity(capacity)),
                sealed: AtomicBool::new(false),
                sample_rate,
                channels,
            }),
        }
    }

    /// Append samples to the end of the buffer and return the new length
    pub fn append(&self, samples: &[i16]) -> Result<usize, BufferError> {
        let mut guard = self
            .inner
            .samples
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        // Checked under the write lock so no append can slip in after `seal`.
        if self.inner.sealed.load(Ordering::Acquire) {
            return Err(BufferError::Sealed);
        }
        guard.extend_from_slice(samples);
        Ok(guard.len())
    }

    /// Current write position
    pub fn len(&self) -> usize {
        self.inner
            .samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out `range`. Returns `None` if the range reaches past the current length
    /// or is reversed.
    pub fn read_range(&self, range: Range<usize>) -> Option<Vec<i16>> {
        let guard = self
            .inner
            .samples
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if range.start > range.end {
            return None;
        }
        guard.get(range).map(<[i16]>::to_vec)
    }

    /// Copy the last `count` samples (fewer if the buffer is shorter)
    pub fn tail(&self, count: usize) -> Vec<i16> {
        let guard = self
            .inner
            .samples
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let start = guard.len().saturating_sub(count);
        guard[start..].to_vec()
    }

    /// Run `f` over the whole buffer without copying it
    pub fn with_samples<R>(&self, f: impl FnOnce(&[i16]) -> R) -> R {
        let guard = self
            .inner
            .samples
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Stop accepting appends. Idempotent.
    pub fn seal(&self) -> usize {
        let guard = self
            .inner
            .samples
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.inner.sealed.store(true, Ordering::Release);
        guard.len()
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.sealed.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.inner.channels
    }

    /// Playback duration of `samples` interleaved samples in this buffer's format
    pub fn duration_of(&self, samples: usize) -> Duration {
        let per_second = self.inner.sample_rate as f64 * self.inner.channels.max(1) as f64;
        if per_second == 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(samples as f64 / per_second)
    }

    /// Total buffered duration
    pub fn duration(&self) -> Duration {
        self.duration_of(self.len())
    }
}

impl std::fmt::Debug for SessionBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuffer")
            .field("len", &self.len())
            .field("sealed", &self.is_sealed())
            .field("sample_rate", &self.inner.sample_rate)
            .field("channels", &self.inner.channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_grows_length() {
        let buffer = SessionBuffer::new(16000, 1);
        assert!(buffer.is_empty());

        assert_eq!(buffer.append(&[1, 2, 3]).unwrap(), 3);
        assert_eq!(buffer.append(&[4, 5]).unwrap(), 5);
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_read_range_bounds() {
        let buffer = SessionBuffer::new(16000, 1);
        buffer.append(&[10, 20, 30, 40]).unwrap();

        assert_eq!(buffer.read_range(1..3), Some(vec![20, 30]));
        assert_eq!(buffer.read_range(4..4), Some(vec![]));
        assert_eq!(buffer.read_range(2..5), None);
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = buffer.read_range(3..1);
        assert_eq!(reversed, None);
    }

    #[test]
    fn test_earlier_ranges_unchanged_by_appends() {
        let buffer = SessionBuffer::new(16000, 1);
        buffer.append(&[7; 100]).unwrap();
        let before = buffer.read_range(0..100).unwrap();

        buffer.append(&[9; 500]).unwrap();

        assert_eq!(buffer.read_range(0..100).unwrap(), before);
    }

    #[test]
    fn test_seal_rejects_appends() {
        let buffer = SessionBuffer::new(16000, 1);
        buffer.append(&[1, 2]).unwrap();

        assert_eq!(buffer.seal(), 2);
        assert!(buffer.is_sealed());
        assert_eq!(buffer.append(&[3]), Err(BufferError::Sealed));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_tail_shorter_than_request() {
        let buffer = SessionBuffer::new(16000, 1);
        buffer.append(&[1, 2, 3]).unwrap();

        assert_eq!(buffer.tail(2), vec![2, 3]);
        assert_eq!(buffer.tail(10), vec![1, 2, 3]);
    }

    #[test]
    fn test_duration_uses_channels() {
        let buffer = SessionBuffer::new(8000, 2);
        buffer.append(&vec![0; 16000]).unwrap();

        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_reader_sees_monotonic_length() {
        let buffer = SessionBuffer::new(16000, 1);
        let writer = buffer.clone();

        let handle = std::thread::spawn(move || {
            for _ in 0..200 {
                writer.append(&[1; 64]).unwrap();
            }
        });

        let mut last = 0;
        while !handle.is_finished() {
            let len = buffer.len();
            assert!(len >= last);
            assert!(buffer.read_range(0..len).is_some());
            last = len;
        }
        handle.join().unwrap();
        assert_eq!(buffer.len(), 200 * 64);
    }
}
