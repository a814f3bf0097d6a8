//! Bounded ring of reusable `--disk-cache-dir` paths.
//!
//! Replaces the `LinkedList` sketched in earlier designs with a
//! fixed-capacity queue: pushing past capacity evicts (and deletes) the
//! oldest entry rather than growing unbounded.

use std::path::PathBuf;

use crossbeam_queue::ArrayQueue;

pub struct DiskCacheRing {
    queue: ArrayQueue<PathBuf>,
}

impl DiskCacheRing {
    pub fn new(capacity: usize) -> Self {
        DiskCacheRing {
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Hands back a previously-used cache dir, if one is available.
    pub fn take(&self) -> Option<PathBuf> {
        self.queue.pop()
    }

    /// Returns a cache dir for reuse; if the ring is full, the oldest entry
    /// is evicted and its directory removed from disk.
    pub fn give_back(&self, dir: PathBuf) {
        if let Err(dir) = self.queue.push(dir) {
            // Full: evict oldest to make room, then retry once.
            if let Some(evicted) = self.queue.pop() {
                let _ = std::fs::remove_dir_all(&evicted);
            }
            let _ = self.queue.push(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let ring = DiskCacheRing::new(2);
        ring.give_back(PathBuf::from("/tmp/a"));
        ring.give_back(PathBuf::from("/tmp/b"));
        ring.give_back(PathBuf::from("/tmp/c"));
        // "a" was evicted (and its (nonexistent) dir silently skipped); the
        // ring should now yield "b" then "c".
        assert_eq!(ring.take(), Some(PathBuf::from("/tmp/b")));
        assert_eq!(ring.take(), Some(PathBuf::from("/tmp/c")));
        assert_eq!(ring.take(), None);
    }
}
