use crossbeam_queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Freed buffers larger than this are dropped instead of recycled.
const MAX_RECYCLED_CAPACITY: usize = 16 * 1024 * 1024;

/// Allocation counters for a [`WorkspacePool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkspaceStats {
    pub allocated: u64,
    pub freed: u64,
}

impl WorkspaceStats {
    /// Workspaces currently checked out.
    pub fn outstanding(&self) -> u64 {
        self.allocated - self.freed
    }
}

/// Scratch-buffer allocator shared by every collective on one rank.
///
/// Each [`Workspace`] returns its storage on drop, so allocate and free are
/// paired on every path, including early error returns. Freed storage is
/// recycled through a bounded lock-free queue.
pub struct WorkspacePool {
    free_list: ArrayQueue<Vec<u8>>,
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl WorkspacePool {
    /// Create a pool keeping up to `capacity` freed buffers for reuse.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free_list: ArrayQueue::new(capacity.max(1)),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        })
    }

    /// Allocate a zeroed workspace of `len` bytes.
    pub fn allocate(self: &Arc<Self>, len: usize) -> Workspace {
        let mut buf = self.free_list.pop().unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(len, "workspace allocated");
        Workspace {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.freed.fetch_add(1, Ordering::Relaxed);
        if buf.capacity() <= MAX_RECYCLED_CAPACITY {
            buf.clear();
            let _ = self.free_list.push(buf);
        }
    }

    pub fn stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for WorkspacePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspacePool")
            .field("stats", &self.stats())
            .field("recycled", &self.free_list.len())
            .finish()
    }
}

/// A scratch buffer checked out from a [`WorkspacePool`]. Derefs to `[u8]`.
/// Dropping it is the one and only free.
pub struct Workspace {
    buf: Vec<u8>,
    pool: Arc<WorkspacePool>,
}

impl Deref for Workspace {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for Workspace {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("len", &self.buf.len())
            .finish()
    }
}
