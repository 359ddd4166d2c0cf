/*!
 * Atomic Array
 *
 * Fixed-size indexed collection of independent [`AtomicCell`] slots.
 * Each index is its own linearization point; no cross-index atomicity
 * is offered.
 */

use super::cell::{AtomicCell, Word, WordArith};

/// Fixed-size array of independent atomic cells
///
/// # Examples
///
/// ```
/// use threadgate::AtomicArray;
///
/// let counters = AtomicArray::new(4, 0u64);
/// counters.fetch_add(2, 10);
/// assert_eq!(counters.load(2), 10);
/// assert_eq!(counters.load(0), 0);
/// ```
pub struct AtomicArray<T: Word> {
    cells: Box<[AtomicCell<T>]>,
}

impl<T: Word> AtomicArray<T> {
    /// Create an array of `len` cells, each holding `initial`
    pub fn new(len: usize, initial: T) -> Self {
        Self {
            cells: (0..len).map(|_| AtomicCell::new(initial)).collect(),
        }
    }

    /// Create an array from per-index initial values
    pub fn from_fn(len: usize, mut init: impl FnMut(usize) -> T) -> Self {
        Self {
            cells: (0..len).map(|i| AtomicCell::new(init(i))).collect(),
        }
    }

    /// Number of slots
    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the array has no slots
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Borrow the cell at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn cell(&self, index: usize) -> &AtomicCell<T> {
        &self.cells[index]
    }

    /// Read the value at `index`
    #[inline]
    pub fn load(&self, index: usize) -> T {
        self.cells[index].load()
    }

    /// Replace the value at `index`
    #[inline]
    pub fn store(&self, index: usize, value: T) {
        self.cells[index].store(value);
    }

    /// Replace the value at `index`, returning the previous one
    #[inline]
    pub fn swap(&self, index: usize, value: T) -> T {
        self.cells[index].swap(value)
    }

    /// CAS on the cell at `index`
    #[inline]
    pub fn compare_and_swap(&self, index: usize, expected: T, new: T) -> bool {
        self.cells[index].compare_and_swap(expected, new)
    }

    /// Copy out every slot. Each read is atomic; the vector as a whole
    /// is not a consistent cut under concurrent writes.
    pub fn snapshot(&self) -> Vec<T> {
        self.cells.iter().map(AtomicCell::load).collect()
    }
}

impl<T: WordArith> AtomicArray<T> {
    /// Add `delta` at `index` (wrapping), returning the previous value
    #[inline]
    pub fn fetch_add(&self, index: usize, delta: T) -> T {
        self.cells[index].fetch_add(delta)
    }
}

impl<T: Word + std::fmt::Debug> std::fmt::Debug for AtomicArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}
