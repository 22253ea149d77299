//! Single-producer/single-consumer fixed ring with drop-on-full pushes.
//!
//! Each node carries three atomic markers. Exactly one start and one end
//! marker exist at any instant; the consumer moves `start`, the producer
//! moves `end`, and each checks the other's marker before advancing.
//! `write_ready` is true while a slot holds no unread value: the producer
//! releases it to false after the value is fully written, the consumer
//! acquires it before reading and releases it back to true afterwards.
//!
//! Only two threads may touch one queue.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const DEFAULT_CAPACITY: usize = 5;

struct Node {
    is_start: AtomicBool,
    is_end: AtomicBool,
    write_ready: AtomicBool,
    value: UnsafeCell<Vec<u8>>,
}

impl Node {
    fn new() -> Self {
        Self {
            is_start: AtomicBool::new(false),
            is_end: AtomicBool::new(false),
            write_ready: AtomicBool::new(true),
            value: UnsafeCell::new(Vec::new()),
        }
    }
}

pub struct FixedQueue {
    nodes: Box<[Node]>,
    // Owned by the consumer thread.
    read_index: AtomicUsize,
    // Owned by the producer thread.
    write_index: AtomicUsize,
}

// SAFETY: the node payload is only touched by the producer while
// `write_ready` is true and by the consumer while it is false; the
// acquire/release pairs on `write_ready` order those accesses.
unsafe impl Send for FixedQueue {}
unsafe impl Sync for FixedQueue {}

impl Default for FixedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 2, "queue needs room for start and end markers");
        let nodes: Box<[Node]> = (0..capacity).map(|_| Node::new()).collect();
        nodes[0].is_start.store(true, Ordering::Release);
        nodes[0].is_end.store(true, Ordering::Release);
        Self {
            nodes,
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
        }
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.nodes.len()
    }

    /// Never blocks. The value is dropped silently when the ring is full.
    pub fn push(&self, value: Vec<u8>) {
        let end = self.write_index.load(Ordering::Relaxed);
        let slot = if self.nodes[end].write_ready.load(Ordering::Acquire) {
            // End slot already consumed; reuse it in place.
            end
        } else {
            let next = self.next(end);
            if self.nodes[next].is_start.load(Ordering::Acquire) {
                return;
            }
            self.nodes[next].is_end.store(true, Ordering::Release);
            self.nodes[end].is_end.store(false, Ordering::Release);
            self.write_index.store(next, Ordering::Relaxed);
            next
        };

        unsafe {
            *self.nodes[slot].value.get() = value;
        }
        self.nodes[slot].write_ready.store(false, Ordering::Release);
    }

    /// Returns `None` when nothing has been produced since the last pop.
    pub fn pop(&self) -> Option<Vec<u8>> {
        loop {
            let start = self.read_index.load(Ordering::Relaxed);
            let node = &self.nodes[start];

            if !node.write_ready.load(Ordering::Acquire) {
                let value = unsafe { std::mem::take(&mut *node.value.get()) };
                node.write_ready.store(true, Ordering::Release);
                if !node.is_end.load(Ordering::Acquire) {
                    self.advance_start(start);
                }
                return Some(value);
            }

            if node.is_end.load(Ordering::Acquire) {
                return None;
            }
            // Head already consumed and the producer has moved past it;
            // step the start marker forward and look again.
            self.advance_start(start);
        }
    }

    fn advance_start(&self, start: usize) {
        let next = self.next(start);
        self.nodes[next].is_start.store(true, Ordering::Release);
        self.nodes[start].is_start.store(false, Ordering::Release);
        self.read_index.store(next, Ordering::Relaxed);
    }
}
