//! Traversal stacks, on the stack when the tree is shallow enough and on the heap otherwise.

pub trait FastStack<T: Copy + Default> {
    fn push(&mut self, v: T);
    fn pop(&mut self) -> Option<T>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool;
    fn clear(&mut self);
}

/// Picks a fixed size `StackStack<T, N>` for the first threshold `size` fits in, falling back to a
/// `HeapStack<T>` sized exactly, then runs `$body` with the stack bound to `$stack_ident`.
///
/// # Usage
/// ```
/// use qbvh::{fast_stack, faststack::FastStack};
/// let depth = 10;
/// let sum = fast_stack!(u32, (32, 64), depth, stack, {
///     stack.push(1);
///     stack.push(2);
///     stack.pop().unwrap_or(0) + stack.pop().unwrap_or(0)
/// });
/// assert_eq!(sum, 3);
/// ```
#[macro_export]
macro_rules! fast_stack {
    ( $ty:ty,
      ($first:expr $(, $rest:expr)* $(,)?),
      $size:expr,
      $stack_ident:ident,
      $body:block
    ) => {{
        match $size {
            s if s <= $first => {
                let mut $stack_ident = $crate::faststack::StackStack::<$ty, $first>::default();
                $body
            }
            $(
                s if s <= $rest => {
                    let mut $stack_ident = $crate::faststack::StackStack::<$ty, $rest>::default();
                    $body
                }
            )*
            _ => {
                let mut $stack_ident = $crate::faststack::HeapStack::<$ty>::new_with_capacity($size);
                $body
            }
        }
    }};
}

/// Heap allocated stack with a fixed capacity. Never reallocates after `new_with_capacity`.
#[derive(Clone)]
pub struct HeapStack<T: Copy + Default> {
    data: Vec<T>,
    index: usize,
}

impl<T: Copy + Default> HeapStack<T> {
    /// # Panics
    /// If `cap` is zero.
    pub fn new_with_capacity(cap: usize) -> Self {
        assert!(cap > 0);
        HeapStack {
            data: vec![Default::default(); cap],
            index: 0,
        }
    }

    #[inline(always)]
    pub fn cap(&self) -> usize {
        self.data.len()
    }
}

impl<T: Copy + Default> FastStack<T> for HeapStack<T> {
    /// # Panics
    /// If the stack is full.
    #[inline(always)]
    fn push(&mut self, v: T) {
        assert!(
            self.index < self.data.len(),
            "HeapStack is full (capacity: {})",
            self.data.len()
        );
        self.data[self.index] = v;
        self.index += 1;
    }

    #[inline(always)]
    fn pop(&mut self) -> Option<T> {
        if self.index > 0 {
            self.index -= 1;
            Some(self.data[self.index])
        } else {
            None
        }
    }

    #[inline(always)]
    fn len(&self) -> usize {
        self.index
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.index == 0
    }

    #[inline(always)]
    fn clear(&mut self) {
        self.index = 0;
    }
}

/// A stack implemented on the stack with fixed capacity.
pub struct StackStack<T: Copy + Default, const STACK_SIZE: usize> {
    data: [T; STACK_SIZE],
    index: usize,
}

impl<T: Copy + Default, const STACK_SIZE: usize> Default for StackStack<T, STACK_SIZE> {
    fn default() -> Self {
        Self {
            data: [Default::default(); STACK_SIZE],
            index: 0,
        }
    }
}

impl<T: Copy + Default, const STACK_SIZE: usize> FastStack<T> for StackStack<T, STACK_SIZE> {
    /// # Panics
    /// If the stack is full. Callers size the stack from the tree depth so this only trips on a bug.
    #[inline(always)]
    fn push(&mut self, v: T) {
        self.data[self.index] = v;
        self.index += 1;
    }
    #[inline(always)]
    fn pop(&mut self) -> Option<T> {
        if self.index > 0 {
            self.index -= 1;
            Some(self.data[self.index])
        } else {
            None
        }
    }
    #[inline(always)]
    fn len(&self) -> usize {
        self.index
    }
    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.index == 0
    }
    #[inline(always)]
    fn clear(&mut self) {
        self.index = 0;
    }
}
