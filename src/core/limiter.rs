use parking_lot::{Condvar, Mutex};

/// Byte accounting shared by every concurrent segment build. A builder
/// reserves before buffering more; when the reservation is denied it must
/// flush its open segment and release what it held. Invariant: the counter
/// is zero whenever no build is running.
pub struct SegmentBufferLimiter {
    limit: usize,
    used: Mutex<usize>,
    released: Condvar,
}

impl SegmentBufferLimiter {
    pub fn new(limit: usize) -> Self {
        SegmentBufferLimiter {
            limit,
            used: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    /// Try to reserve without blocking. A builder holding nothing is always
    /// granted its first reservation, even one larger than the limit, so a
    /// single oversized row cannot wedge the build.
    pub fn try_reserve(&self, bytes: usize, already_held: usize) -> bool {
        let mut used = self.used.lock();
        if *used + bytes <= self.limit || already_held == 0 {
            *used += bytes;
            true
        } else {
            false
        }
    }

    /// Reserve, blocking until other builders release enough.
    pub fn reserve_blocking(&self, bytes: usize) {
        let mut used = self.used.lock();
        while *used + bytes > self.limit && *used > 0 {
            self.released.wait(&mut used);
        }
        *used += bytes;
    }

    pub fn release(&self, bytes: usize) {
        let mut used = self.used.lock();
        debug_assert!(*used >= bytes, "limiter release exceeds reservation");
        *used = used.saturating_sub(bytes);
        self.released.notify_all();
    }
}

/// Count of per-column initial builds currently in flight.
pub struct ColumnsInFlight {
    count: Mutex<usize>,
    changed: Condvar,
}

impl ColumnsInFlight {
    pub fn new() -> Self {
        ColumnsInFlight {
            count: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    pub fn enter(&self) {
        *self.count.lock() += 1;
    }

    pub fn leave(&self) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(1);
        self.changed.notify_all();
    }

    pub fn current(&self) -> usize {
        *self.count.lock()
    }
}

impl Default for ColumnsInFlight {
    fn default() -> Self {
        ColumnsInFlight::new()
    }
}
