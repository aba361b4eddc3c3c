/*!
 * Part accumulation buffer
 *
 * Bytes written to an upload stream collect here until they form a part. The
 * buffer never grows beyond its limit: callers fill it up to a flush point and
 * take a frozen part out before adding more.
 */

use bytes::{Bytes, BytesMut};

/// Capacity-bounded byte accumulator for one part at a time
#[derive(Debug)]
pub struct PartBuffer {
    data: BytesMut,
    limit: usize,
}

impl PartBuffer {
    /// Create a buffer for parts cut at `flush_point`.
    ///
    /// The limit is the larger of the two values, so a flush point above the
    /// configured capacity (the encryption residual) still fits. Callers fill
    /// up to the flush point, so with a capacity above it the limit is never
    /// reached.
    pub fn new(capacity: usize, flush_point: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(flush_point),
            limit: capacity.max(flush_point),
        }
    }

    /// Bytes currently held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Maximum number of bytes the buffer may hold
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Append as much of `input` as fits below `up_to` bytes held.
    ///
    /// Returns the number of bytes consumed from `input`.
    pub fn fill(&mut self, input: &[u8], up_to: usize) -> usize {
        let target = up_to.min(self.limit);
        let room = target.saturating_sub(self.data.len());
        let take = room.min(input.len());
        self.data.extend_from_slice(&input[..take]);
        take
    }

    /// Size of the part [`take_part`](Self::take_part) would produce
    pub fn part_len(&self, withhold_last: bool) -> usize {
        if withhold_last {
            self.data.len().saturating_sub(1)
        } else {
            self.data.len()
        }
    }

    /// Split the buffered bytes off as a part.
    ///
    /// With `withhold_last` the final byte stays behind and becomes the first byte
    /// of the next part.
    pub fn take_part(&mut self, withhold_last: bool) -> Bytes {
        let len = self.part_len(withhold_last);
        self.data.split_to(len).freeze()
    }

    /// Put a part that failed to transmit back in front of whatever is buffered
    pub fn restore(&mut self, part: Bytes) {
        if part.is_empty() {
            return;
        }
        let mut restored = BytesMut::with_capacity(part.len() + self.data.len());
        restored.extend_from_slice(&part);
        restored.extend_from_slice(&self.data);
        self.data = restored;
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.data.clear();
    }
}
