//! Recycling of built structures so rebuilds reuse their buffers.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// A structure that can be emptied while keeping its allocations.
pub trait Recycle: Default {
    fn recycle(&mut self);
}

/// Free list of structures. Holds at most `capacity` of them, anything released past that is dropped.
#[derive(Debug)]
pub struct StructurePool<T: Recycle> {
    free: Vec<Box<T>>,
    capacity: usize,
}

impl<T: Recycle> Default for StructurePool<T> {
    fn default() -> Self {
        Self::new(16)
    }
}

impl<T: Recycle> StructurePool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// A recycled structure if one is free, otherwise a fresh default one.
    pub fn acquire(&mut self) -> Box<T> {
        self.free.pop().unwrap_or_default()
    }

    pub fn release(&mut self, mut item: Box<T>) {
        if self.free.len() < self.capacity {
            item.recycle();
            self.free.push(item);
        }
    }

    /// Number of free structures.
    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// A [`StructurePool`] behind a mutex, for builds running on several threads.
#[derive(Debug, Default)]
pub struct SharedPool<T: Recycle>(Mutex<StructurePool<T>>);

impl<T: Recycle> SharedPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self(Mutex::new(StructurePool::new(capacity)))
    }

    pub fn acquire(&self) -> Box<T> {
        self.lock().acquire()
    }

    pub fn release(&self, item: Box<T>) {
        self.lock().release(item)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` with the pool locked. Keep it short, other threads wait on it.
    pub fn with<R>(&self, f: impl FnOnce(&mut StructurePool<T>) -> R) -> R {
        f(&mut self.lock())
    }

    // Poisoning is ignored, the free list is consistent between calls.
    fn lock(&self) -> MutexGuard<'_, StructurePool<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
