//! A sorted map over opaque byte-string keys, built for one writer and
//! many concurrent readers.
//!
//! Thread safety
//! -------------
//!
//! Writes require external synchronization (the memtable serializes
//! them with a mutex). Reads only require that the skip list is not
//! destroyed while in progress; beyond that they run without any
//! internal locking.
//!
//! Invariants:
//!
//! (1) Nodes are allocated from the arena and never freed until the
//!     skip list itself is dropped.
//! (2) The contents of a node other than its forward links are
//!     immutable once the node is linked in. Only `insert` modifies
//!     the list, and it initializes a node fully before publishing it
//!     with release-stores into the predecessor links.
//!
//! Together these mean a reader that observes a node through any link
//! sees a fully initialized node, and every node it has observed stays
//! valid for the reader's lifetime.

use crate::collections::arena::Arena;
use rand::Rng;
use std::cmp::Ordering;
use std::mem::size_of;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering as MemOrder};
use std::sync::Arc;

pub const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

/// Compares the encoded keys two nodes point at.
pub trait KeyComparator: Send + Sync {
    /// # Safety
    ///
    /// `a` and `b` must point at encoded keys produced by the caller
    /// of `SkipList::insert` (or at a seek target in the same format).
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> Ordering;
}

#[repr(C)]
struct Node {
    key: *const u8,
    // First element of the forward-link tower. The remaining
    // `height - 1` links are allocated contiguously after the node;
    // `link(n)` does the pointer arithmetic.
    next: [AtomicPtr<Node>; 1],
}

impl Node {
    #[inline]
    unsafe fn link(&self, n: usize) -> &AtomicPtr<Node> {
        &*self.next.as_ptr().add(n)
    }

    /// Acquire-load so the reader observes a fully initialized node.
    #[inline]
    unsafe fn next(&self, n: usize) -> *mut Node {
        self.link(n).load(MemOrder::Acquire)
    }

    /// Release-store so anybody reading through this link observes a
    /// fully initialized node.
    #[inline]
    unsafe fn set_next(&self, n: usize, node: *mut Node) {
        self.link(n).store(node, MemOrder::Release);
    }

    #[inline]
    unsafe fn no_barrier_next(&self, n: usize) -> *mut Node {
        self.link(n).load(MemOrder::Relaxed)
    }

    #[inline]
    unsafe fn no_barrier_set_next(&self, n: usize, node: *mut Node) {
        self.link(n).store(node, MemOrder::Relaxed);
    }
}

pub struct SkipList<C: KeyComparator> {
    cmp: C,
    arena: Arc<Arena>,
    head: *mut Node,
    // Modified only by insert; read racily by readers. A reader that
    // sees a stale (smaller) value just starts lower; a reader that
    // sees the new value either finds the published link or null and
    // drops a level. Both are correct, so relaxed ordering suffices.
    max_height: AtomicUsize,
}

unsafe impl<C: KeyComparator> Send for SkipList<C> {}
unsafe impl<C: KeyComparator> Sync for SkipList<C> {}

impl<C: KeyComparator> SkipList<C> {
    pub fn new(cmp: C, arena: Arc<Arena>) -> SkipList<C> {
        let head = unsafe { Self::new_node(&arena, ptr::null(), MAX_HEIGHT) };
        SkipList {
            cmp,
            arena,
            head,
            max_height: AtomicUsize::new(1),
        }
    }

    /// Insert `key` into the list.
    ///
    /// # Safety
    ///
    /// - Writers must be externally serialized: no other `insert` may
    ///   run concurrently.
    /// - `key` must point at an encoded key that outlives the list
    ///   (in practice, arena-allocated by the memtable).
    /// - Nothing comparing equal to `key` may already be in the list.
    pub unsafe fn insert(&self, key: *const u8) {
        let mut prev: [*mut Node; MAX_HEIGHT] = [ptr::null_mut(); MAX_HEIGHT];
        let node = self.find_greater_or_equal(key, Some(&mut prev));

        debug_assert!(node.is_null() || self.cmp.compare((*node).key, key) != Ordering::Equal);

        let height = self.random_height();
        if height > self.max_height() {
            for p in prev.iter_mut().take(height).skip(self.max_height()) {
                *p = self.head;
            }
            // A racing reader that observes the new height before the
            // new links sees null at the extra levels and drops down.
            self.max_height.store(height, MemOrder::Relaxed);
        }

        let node = Self::new_node(&self.arena, key, height);
        for (i, &p) in prev.iter().enumerate().take(height) {
            // The node is not reachable yet, so its own link can be
            // set without a barrier; publication happens through the
            // release-store into prev[i].
            (*node).no_barrier_set_next(i, (*p).no_barrier_next(i));
            (*p).set_next(i, node);
        }
    }

    pub fn contains(&self, key: *const u8) -> bool {
        unsafe {
            let node = self.find_greater_or_equal(key, None);
            !node.is_null() && self.cmp.compare((*node).key, key) == Ordering::Equal
        }
    }

    pub fn iter(&self) -> SkipListIterator<C> {
        SkipListIterator {
            list: self,
            node: ptr::null(),
        }
    }

    #[inline]
    fn max_height(&self) -> usize {
        self.max_height.load(MemOrder::Relaxed)
    }

    fn random_height(&self) -> usize {
        // Increase height with probability 1 in BRANCHING.
        let mut rng = rand::thread_rng();
        let mut height = 1;
        while height < MAX_HEIGHT && rng.gen_range(1..=BRANCHING) == 1 {
            height += 1;
        }
        debug_assert!((1..=MAX_HEIGHT).contains(&height));
        height
    }

    unsafe fn new_node(arena: &Arena, key: *const u8, height: usize) -> *mut Node {
        let size = size_of::<Node>() + (height - 1) * size_of::<AtomicPtr<Node>>();
        let node = arena.allocate_aligned(size) as *mut Node;
        ptr::addr_of_mut!((*node).key).write(key);
        for i in 0..height {
            ((*node).next.as_mut_ptr().add(i)).write(AtomicPtr::new(ptr::null_mut()));
        }
        node
    }

    /// True if `key` is after the data stored in `node`; null nodes
    /// count as infinite.
    unsafe fn key_is_after_node(&self, key: *const u8, node: *mut Node) -> bool {
        !node.is_null() && self.cmp.compare((*node).key, key) == Ordering::Less
    }

    /// Return the first node at or after `key` (null if none), filling
    /// `prev` with the predecessor at every level when requested.
    unsafe fn find_greater_or_equal(
        &self,
        key: *const u8,
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut node = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = (*node).next(level);
            if self.key_is_after_node(key, next) {
                node = next;
            } else {
                if let Some(ref mut p) = prev {
                    p[level] = node;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Return the last node whose key is < `key`, or the head if there
    /// is no such node.
    unsafe fn find_less_than(&self, key: *const u8) -> *mut Node {
        let mut node = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = (*node).next(level);
            if next.is_null() || self.cmp.compare((*next).key, key) != Ordering::Less {
                if level == 0 {
                    return node;
                }
                level -= 1;
            } else {
                node = next;
            }
        }
    }

    /// Return the last node in the list, or the head if it is empty.
    unsafe fn find_last(&self) -> *mut Node {
        let mut node = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = (*node).next(level);
            if next.is_null() {
                if level == 0 {
                    return node;
                }
                level -= 1;
            } else {
                node = next;
            }
        }
    }
}

/// Iteration over the contents of a skip list. The iterator holds a
/// borrow of the list, which in turn keeps the arena alive.
pub struct SkipListIterator<'a, C: KeyComparator> {
    list: &'a SkipList<C>,
    node: *const Node,
}

impl<'a, C: KeyComparator> SkipListIterator<'a, C> {
    #[inline]
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Pointer to the encoded key at the current position.
    /// Requires `valid()`.
    #[inline]
    pub fn key(&self) -> *const u8 {
        debug_assert!(self.valid());
        unsafe { (*self.node).key }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        unsafe {
            self.node = (*self.node).next(0);
        }
    }

    pub fn prev(&mut self) {
        // Instead of using explicit "prev" links, search for the last
        // node that falls before the current key.
        debug_assert!(self.valid());
        unsafe {
            let node = self.list.find_less_than((*self.node).key);
            self.node = if node == self.list.head {
                ptr::null()
            } else {
                node
            };
        }
    }

    pub fn seek(&mut self, target: *const u8) {
        unsafe {
            self.node = self.list.find_greater_or_equal(target, None);
        }
    }

    pub fn seek_to_first(&mut self) {
        unsafe {
            self.node = (*self.list.head).next(0);
        }
    }

    pub fn seek_to_last(&mut self) {
        unsafe {
            let node = self.list.find_last();
            self.node = if node == self.list.head {
                ptr::null()
            } else {
                node
            };
        }
    }
}
