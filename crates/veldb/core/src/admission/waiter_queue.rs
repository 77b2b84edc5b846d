// VelDB
// Copyright (C) 2026 VelDB Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Lock-free queue of parked threads.
//!
//! Producers append concurrently; a single consumer detaches the whole
//! chain in one atomic step. The structure avoids a full lock-free queue
//! algorithm while still guaranteeing that no wakeup is lost.
//!
//! # Push protocol
//!
//! 1. Swap the new node into the top pointer. The node is now reachable,
//!    but its link to the previous chain is not yet set.
//! 2. Store the previous top into the node's link.
//! 3. Fire the node's one-shot `link_published` flag.
//!
//! # Cut protocol
//!
//! `drain_all` swaps the top with null. Everything swapped in before the
//! cut belongs to the detached chain; pushes after the cut start a fresh
//! chain from null. The consumer spins on `link_published` before
//! traversing past a node, so a producer caught between steps 1 and 3
//! never causes the rest of the chain to be skipped.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::thread::{self, Thread};

/// A single parked thread in the waiter queue.
pub struct WaiterNode {
    /// Handle used to unpark the waiting thread.
    thread: Thread,
    /// Diagnostic label of the waiting thread, captured at park time.
    thread_label: String,
    /// The chain that was on top when this node was pushed. Not safe to
    /// traverse until `link_published` fires.
    link: AtomicPtr<WaiterNode>,
    /// One-shot signal that `link` may be followed.
    link_published: AtomicBool,
    /// One-shot wake token; parking loops until it is set.
    woken: AtomicBool,
}

impl WaiterNode {
    fn new(thread: Thread) -> Self {
        let thread_label = match thread.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", thread.id()),
        };
        Self {
            thread,
            thread_label,
            link: AtomicPtr::new(ptr::null_mut()),
            link_published: AtomicBool::new(false),
            woken: AtomicBool::new(false),
        }
    }

    /// Diagnostic label of the thread parked on this node.
    pub fn thread_label(&self) -> &str {
        &self.thread_label
    }

    /// Whether the wake token has been delivered.
    pub fn was_woken(&self) -> bool {
        self.woken.load(Ordering::Acquire)
    }

    /// Deliver the wake token and unpark the owning thread.
    pub fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }

    /// Park the calling thread until the wake token arrives.
    ///
    /// Spurious unparks re-park: the loop exits only on the token. This
    /// block is deliberately uncancellable — admission bookkeeping must
    /// not unwind while a freeze is outstanding.
    pub fn park_until_woken(&self) {
        while !self.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }
}

/// Lock-free list of parked waiters supporting concurrent appends and one
/// atomic full drain at a time.
pub struct WaiterQueue {
    /// Most recently pushed node; null when the current chain is empty.
    top: AtomicPtr<WaiterNode>,
}

impl WaiterQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self { top: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Append a node for the calling thread and return a handle to it.
    ///
    /// The queue keeps its own reference to the node; the returned handle
    /// stays valid after a drain frees the queue's reference, so the
    /// parked thread can keep re-checking its wake token.
    pub fn push(&self) -> Arc<WaiterNode> {
        let node = Arc::new(WaiterNode::new(thread::current()));
        let raw = Arc::into_raw(Arc::clone(&node)) as *mut WaiterNode;
        let prev = self.top.swap(raw, Ordering::AcqRel);
        node.link.store(prev, Ordering::Relaxed);
        node.link_published.store(true, Ordering::Release);
        node
    }

    /// Detach the entire current chain in one atomic step.
    ///
    /// Returns every node pushed before the cut, newest first. Nodes
    /// pushed after the cut start a fresh chain. Single consumer: callers
    /// must not run two drains concurrently.
    pub fn drain_all(&self) -> Vec<Arc<WaiterNode>> {
        let mut cursor = self.top.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut drained = Vec::new();
        while !cursor.is_null() {
            // Reclaim the reference push() left with the queue.
            let node = unsafe { Arc::from_raw(cursor) };
            while !node.link_published.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            cursor = node.link.load(Ordering::Acquire);
            drained.push(node);
        }
        drained
    }

    /// Whether the current chain is empty.
    pub fn is_empty(&self) -> bool {
        self.top.load(Ordering::Acquire).is_null()
    }
}

impl Default for WaiterQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaiterQueue {
    fn drop(&mut self) {
        // Release the queue-held references of nodes never drained.
        self.drain_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_push_then_drain_returns_all_nodes() {
        let queue = WaiterQueue::new();
        let first = queue.push();
        let second = queue.push();
        assert!(!queue.is_empty());

        let drained = queue.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());

        // Newest first.
        assert!(Arc::ptr_eq(&drained[0], &second));
        assert!(Arc::ptr_eq(&drained[1], &first));
    }

    #[test]
    fn test_drain_on_empty_queue() {
        let queue = WaiterQueue::new();
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_pushes_after_cut_start_fresh_chain() {
        let queue = WaiterQueue::new();
        queue.push();
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1);

        queue.push();
        queue.push();
        assert_eq!(queue.drain_all().len(), 2);
    }

    #[test]
    fn test_concurrent_pushes_are_not_lost() {
        let queue = Arc::new(WaiterQueue::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    queue.push();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.drain_all().len(), 800);
    }

    #[test]
    fn test_wake_unparks_parked_thread() {
        let queue = Arc::new(WaiterQueue::new());
        let (tx, rx) = mpsc::channel();

        let parked = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let node = queue.push();
                tx.send(()).unwrap();
                node.park_until_woken();
            })
        };

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // The node was pushed before the send, so the cut must find it;
        // waking works whether or not the thread has parked yet.
        let drained = queue.drain_all();
        assert_eq!(drained.len(), 1);
        for node in drained {
            node.wake();
        }
        parked.join().unwrap();
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let queue = WaiterQueue::new();
        let node = queue.push();
        for node in queue.drain_all() {
            node.wake();
        }
        // The token was delivered before parking; this must not block.
        node.park_until_woken();
        assert!(node.was_woken());
    }

    #[test]
    fn test_node_carries_thread_label() {
        let queue = Arc::new(WaiterQueue::new());
        let queue_clone = Arc::clone(&queue);
        thread::Builder::new()
            .name("vel-writer-0".to_string())
            .spawn(move || {
                queue_clone.push();
            })
            .unwrap()
            .join()
            .unwrap();

        let drained = queue.drain_all();
        assert_eq!(drained[0].thread_label(), "vel-writer-0");
    }
}
