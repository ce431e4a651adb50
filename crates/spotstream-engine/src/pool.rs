//! Reusable plane buffers and pixel cursors.
//!
//! Both pools hand out objects with per-checkout exclusivity: an object given
//! to one in-flight frame is not reused until returned. The free list is a
//! bounded channel, so take and return are single atomic operations and the
//! pools can be shared across batch workers without a lock.

use crossbeam_channel::{bounded, Receiver, Sender};
use spotstream_core::Plane;

/// Pool of scalar sample buffers reused across frames and transforms.
pub struct BufferPool {
    free: Receiver<Vec<f32>>,
    returns: Sender<Vec<f32>>,
}

impl BufferPool {
    /// Create a pool holding at most `capacity` idle buffers.
    pub fn new(capacity: usize) -> Self {
        let (returns, free) = bounded(capacity.max(1));
        Self { free, returns }
    }

    /// Check out a buffer; allocates an empty one when the pool is dry.
    pub fn take(&self) -> Vec<f32> {
        self.free.try_recv().unwrap_or_default()
    }

    /// Return a buffer. Overflow beyond the pool capacity is simply dropped.
    pub fn give(&self, mut buffer: Vec<f32>) {
        buffer.clear();
        let _ = self.returns.try_send(buffer);
    }

    /// Drop every idle buffer, releasing their memory. Used when the
    /// orchestrator requests a collection and while draining.
    pub fn drain(&self) {
        while self.free.try_recv().is_ok() {}
    }

    /// Number of idle buffers currently pooled.
    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

/// Pixel accessor scoped to one plane's geometry.
///
/// Holds the precomputed row offsets for the bound dimensions so repeated
/// mask lookups avoid per-sample multiplication; rebinding to a frame of the
/// same size is free.
#[derive(Debug, Default)]
pub struct PlaneCursor {
    width: usize,
    height: usize,
    row_starts: Vec<usize>,
}

impl PlaneCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to a plane's dimensions, rebuilding offsets only on change.
    pub fn bind(&mut self, plane: &Plane) {
        let (w, h) = (plane.width() as usize, plane.height() as usize);
        if w == self.width && h == self.height {
            return;
        }
        self.width = w;
        self.height = h;
        self.row_starts.clear();
        self.row_starts.extend((0..h).map(|y| y * w));
    }

    /// Bounds-checked sample read from a plane with the bound geometry.
    #[inline]
    pub fn value(&self, samples: &[f32], x: u16, y: u16) -> Option<f32> {
        let (x, y) = (x as usize, y as usize);
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(samples[self.row_starts[y] + x])
    }
}

/// Pool of [`PlaneCursor`]s, one checked out per in-flight frame.
pub struct CursorPool {
    free: Receiver<PlaneCursor>,
    returns: Sender<PlaneCursor>,
}

impl CursorPool {
    pub fn new(capacity: usize) -> Self {
        let (returns, free) = bounded(capacity.max(1));
        Self { free, returns }
    }

    pub fn take(&self) -> PlaneCursor {
        self.free.try_recv().unwrap_or_default()
    }

    pub fn give(&self, cursor: PlaneCursor) {
        let _ = self.returns.try_send(cursor);
    }

    pub fn drain(&self) {
        while self.free.try_recv().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_roundtrip_clears() {
        let pool = BufferPool::new(2);
        let mut buf = pool.take();
        buf.extend_from_slice(&[1.0, 2.0, 3.0]);
        pool.give(buf);
        assert_eq!(pool.idle(), 1);
        let again = pool.take();
        assert!(again.is_empty());
        assert!(again.capacity() >= 3);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let pool = BufferPool::new(1);
        pool.give(Vec::new());
        pool.give(Vec::new());
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_drain_releases_idle_buffers() {
        let pool = BufferPool::new(4);
        for _ in 0..3 {
            pool.give(Vec::with_capacity(64));
        }
        pool.drain();
        assert_eq!(pool.idle(), 0);
        // Pool stays usable after a drain.
        let buf = pool.take();
        pool.give(buf);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_cursor_bounds_check() {
        let plane = Plane::from_data(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2);
        let mut cursor = PlaneCursor::new();
        cursor.bind(&plane);
        assert_eq!(cursor.value(plane.data(), 2, 1), Some(6.0));
        assert_eq!(cursor.value(plane.data(), 3, 0), None);
        assert_eq!(cursor.value(plane.data(), 0, 2), None);
    }

    #[test]
    fn test_cursor_rebind_same_dims_keeps_offsets() {
        let a = Plane::from_data(vec![0.0; 6], 3, 2);
        let b = Plane::from_data(vec![9.0; 6], 3, 2);
        let mut cursor = PlaneCursor::new();
        cursor.bind(&a);
        cursor.bind(&b);
        assert_eq!(cursor.value(b.data(), 1, 1), Some(9.0));
    }
}
