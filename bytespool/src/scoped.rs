//! Read-once wrapper that releases a pooled buffer when closed.

use crate::{Origin, SizedPool};
use bytes::Buf;
use std::{
    io::{self, Read},
    ops::Range,
};

/// A pooled buffer consumed front to back, then returned to its pool.
///
/// The readable bytes are a sub-range of an [Origin]. Reading (through
/// [std::io::Read] or [bytes::Buf]) advances a cursor over that range.
/// [ScopedBuffer::close] hands the origin back to the pool exactly once, no
/// matter how often it is called; dropping an open buffer closes it.
///
/// Not meant to be shared between threads while in use: it has a single owner
/// like any other reader.
pub struct ScopedBuffer {
    pool: SizedPool,
    /// `None` once closed.
    origin: Option<Origin>,
    /// Read position within the origin storage.
    cursor: usize,
    /// End of the readable range within the origin storage.
    end: usize,
}

impl std::fmt::Debug for ScopedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedBuffer")
            .field("cursor", &self.cursor)
            .field("end", &self.end)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ScopedBuffer {
    /// Wraps `origin`, exposing `view` (offsets into the full storage) for
    /// reading.
    ///
    /// `origin` should come from `pool`; it is freed to `pool` on close.
    ///
    /// # Panics
    ///
    /// Panics if `view` is not within the capacity of `origin`.
    pub fn new(pool: SizedPool, origin: Origin, view: Range<usize>) -> Self {
        assert!(
            view.start <= view.end && view.end <= origin.capacity(),
            "view {:?} out of bounds for capacity {}",
            view,
            origin.capacity()
        );
        Self {
            pool,
            origin: Some(origin),
            cursor: view.start,
            end: view.end,
        }
    }

    /// Wraps `origin`, exposing its whole view for reading.
    pub fn from_origin(pool: SizedPool, origin: Origin) -> Self {
        let len = origin.len();
        Self::new(pool, origin, 0..len)
    }

    /// Returns the unread bytes without consuming them.
    ///
    /// The slice borrows `self`, so it cannot outlive a later [Self::close].
    /// Empty once closed.
    pub fn shared_bytes(&self) -> &[u8] {
        match &self.origin {
            Some(origin) => &origin.storage()[self.cursor..self.end],
            None => &[],
        }
    }

    /// Returns `true` once [Self::close] has run.
    pub fn is_closed(&self) -> bool {
        self.origin.is_none()
    }

    /// Returns the buffer to the pool.
    ///
    /// Only the first call frees; later calls do nothing. Unread bytes are
    /// discarded.
    pub fn close(&mut self) {
        if let Some(origin) = self.origin.take() {
            self.pool.free(origin);
            self.cursor = self.end;
        }
    }
}

impl Read for ScopedBuffer {
    /// Copies unread bytes into `buf`.
    ///
    /// Returns `Ok(0)` for a non-empty `buf` once every byte has been read (or
    /// the buffer is closed), and keeps doing so on every later call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let src = self.shared_bytes();
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        self.cursor += n;
        Ok(n)
    }
}

impl Buf for ScopedBuffer {
    #[inline]
    fn remaining(&self) -> usize {
        self.shared_bytes().len()
    }

    #[inline]
    fn chunk(&self) -> &[u8] {
        self.shared_bytes()
    }

    #[inline]
    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past end of buffer"
        );
        self.cursor += cnt;
    }
}

impl Drop for ScopedBuffer {
    fn drop(&mut self) {
        self.close();
    }
}
