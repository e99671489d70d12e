use std::marker::PhantomData;
use std::ptr::NonNull;

/// Mutable span handed to several threads at once.
///
/// Parallel partitioning scatters primitives into disjoint index ranges of one buffer from many
/// threads. The span erases the exclusive borrow; callers uphold that no two threads touch the
/// same index between two barriers.
pub(crate) struct SharedSpan<'a, T> {
    memory: NonNull<T>,
    length: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<T: Send> Send for SharedSpan<'_, T> {}
unsafe impl<T: Send> Sync for SharedSpan<'_, T> {}

impl<'a, T> SharedSpan<'a, T> {
    /// Wraps a slice. The slice stays mutably borrowed for as long as the span lives.
    #[inline]
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            length: slice.len(),
            memory: NonNull::from(slice).cast(),
            _marker: PhantomData,
        }
    }

    /// Returns the length of the span in typed elements.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Writes one element.
    ///
    /// # Safety
    /// No other thread may access `index` concurrently.
    #[inline(always)]
    pub unsafe fn write(&self, index: usize, value: T) {
        debug_assert!(index < self.length, "Write out of bounds.");
        *self.memory.as_ptr().add(index) = value;
    }

    /// Reads one element.
    ///
    /// # Safety
    /// No other thread may write `index` concurrently.
    #[inline(always)]
    pub unsafe fn get(&self, index: usize) -> &T {
        debug_assert!(index < self.length, "Read out of bounds.");
        &*self.memory.as_ptr().add(index)
    }

    /// Creates a mutable view of a subrange.
    ///
    /// # Safety
    /// Views handed out concurrently must not overlap.
    #[inline]
    pub unsafe fn slice_mut(&self, start: usize, count: usize) -> &mut [T] {
        debug_assert!(start + count <= self.length, "Slice region out of bounds.");
        std::slice::from_raw_parts_mut(self.memory.as_ptr().add(start), count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_disjoint_parallel_writes() {
        let mut values = vec![0usize; 64];
        {
            let span = SharedSpan::new(&mut values);
            thread::scope(|scope| {
                for worker in 0..4 {
                    let span = &span;
                    scope.spawn(move || {
                        for index in (worker..span.len()).step_by(4) {
                            unsafe { span.write(index, index * 2) };
                        }
                    });
                }
            });
            let tail = unsafe { span.slice_mut(60, 4) };
            tail[0] = 1;
        }
        assert_eq!(values[60], 1);
        assert!(values.iter().enumerate().all(|(i, &v)| i == 60 || v == i * 2));
    }
}
