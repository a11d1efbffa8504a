//! Fixed-capacity single-producer/single-consumer ring of movement blocks.
//!
//! The producer is the command-processing context, the consumer the step
//! generator. Publication order is the whole protocol: the producer finishes
//! writing a block's fields and then advances `head` with release ordering;
//! the consumer snapshots `tail` with acquire ordering before touching a
//! block. A `heapless` SPSC queue would give the same handoff, but look-ahead
//! needs to walk and rewrite blocks that are already queued, so the ring
//! exposes its slots by index instead of hiding them.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::block::Block;

/// Ring of `CAP` block slots, `CAP` a power of two. One slot stays free so
/// `head == tail` is unambiguously empty.
#[derive(Debug)]
pub struct BlockQueue<const CAP: usize> {
    blocks: [Block; CAP],
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl<const CAP: usize> Default for BlockQueue<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> BlockQueue<CAP> {
    const CAP_IS_POWER_OF_TWO: () = assert!(CAP.is_power_of_two());
    const MASK: usize = CAP - 1;

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::CAP_IS_POWER_OF_TWO;
        Self {
            blocks: core::array::from_fn(|_| Block::default()),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) & Self::MASK
    }

    #[inline]
    pub fn prev_index(&self, index: usize) -> usize {
        (index + CAP - 1) & Self::MASK
    }

    #[inline]
    pub fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head() == self.tail()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.next_index(self.head()) == self.tail()
    }

    /// Number of queued moves.
    #[inline]
    pub fn moves_planned(&self) -> usize {
        (self.head() + CAP - self.tail()) & Self::MASK
    }

    /// Distance of `index` from the tail, in slots.
    #[inline]
    pub fn depth(&self, index: usize) -> usize {
        (index + CAP - self.tail()) & Self::MASK
    }

    #[inline]
    pub fn block(&self, index: usize) -> &Block {
        &self.blocks[index & Self::MASK]
    }

    #[inline]
    pub fn block_mut(&mut self, index: usize) -> &mut Block {
        &mut self.blocks[index & Self::MASK]
    }

    /// Publishes the block sitting at the current head. Every field must be
    /// written before this; the release store is what makes them visible to
    /// the consumer.
    pub(crate) fn publish_head(&self) {
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(self.next_index(head), Ordering::Release);
    }

    /// Consumer side: retires the tail block.
    pub(crate) fn advance_tail(&self) {
        let tail = self.tail.load(Ordering::Relaxed);
        self.tail.store(self.next_index(tail), Ordering::Release);
    }

    /// Drops every queued block by advancing `tail` to `head`.
    pub(crate) fn flush(&self) {
        self.tail.store(self.head.load(Ordering::Acquire), Ordering::Release);
    }
}
