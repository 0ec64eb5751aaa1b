//! Sequence storage for column values
//!
//! A Sequence is the lowest-level storage for raw values. Rows are never
//! physically removed from a table (deleted slots are tombstoned), so a
//! sequence only needs random access, overwrite and append.
//!
//! Two implementations:
//! - ArraySequence: one contiguous vector, O(1) access, amortised O(1) append
//!   with occasional whole-buffer reallocation
//! - ChunkedSequence: fixed-size chunks, O(1) access, append never moves
//!   previously written values

use std::fmt::Debug;

/// Trait for sequence storage operations
pub trait Sequence<T: Clone>: Send + Sync {
    /// Return the number of elements in the sequence
    fn len(&self) -> usize;

    /// Check if the sequence is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get value at index (0-based) - clones the value
    fn get(&self, index: usize) -> Result<T, String>;

    /// Get reference to value at index (0-based) - no clone
    fn get_ref(&self, index: usize) -> Option<&T>;

    /// Overwrite value at index
    fn set(&mut self, index: usize, value: T) -> Result<(), String>;

    /// Append value to end
    fn append(&mut self, value: T);

    /// Iterate over all values
    fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_>;
}

/// Simple contiguous array implementation.
#[derive(Debug, Clone)]
pub struct ArraySequence<T: Clone> {
    data: Vec<T>,
}

impl<T: Clone> ArraySequence<T> {
    pub fn new() -> Self {
        ArraySequence { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ArraySequence {
            data: Vec::with_capacity(capacity),
        }
    }
}

impl<T: Clone> Default for ArraySequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Debug + Send + Sync> Sequence<T> for ArraySequence<T> {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> Result<T, String> {
        self.data
            .get(index)
            .cloned()
            .ok_or_else(|| format!("Index {} out of range [0, {})", index, self.data.len()))
    }

    fn get_ref(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    fn set(&mut self, index: usize, value: T) -> Result<(), String> {
        if index >= self.data.len() {
            return Err(format!("Index {} out of range [0, {})", index, self.data.len()));
        }
        self.data[index] = value;
        Ok(())
    }

    fn append(&mut self, value: T) {
        self.data.push(value);
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.data.iter())
    }
}

/// Chunked storage for append-heavy (streaming) tables.
///
/// Values live in chunks of `chunk_size` elements. A full chunk is never
/// reallocated, so appending to a large column costs at most one chunk
/// allocation instead of copying the whole column.
#[derive(Debug, Clone)]
pub struct ChunkedSequence<T: Clone> {
    chunks: Vec<Vec<T>>,
    chunk_size: usize,
    size: usize,
}

impl<T: Clone> ChunkedSequence<T> {
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;

    pub fn new() -> Self {
        Self::with_chunk_size(Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        ChunkedSequence {
            chunks: Vec::new(),
            chunk_size: chunk_size.max(1),
            size: 0,
        }
    }

    /// Number of allocated chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    fn locate(&self, index: usize) -> (usize, usize) {
        (index / self.chunk_size, index % self.chunk_size)
    }
}

impl<T: Clone> Default for ChunkedSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Debug + Send + Sync> Sequence<T> for ChunkedSequence<T> {
    fn len(&self) -> usize {
        self.size
    }

    fn get(&self, index: usize) -> Result<T, String> {
        self.get_ref(index)
            .cloned()
            .ok_or_else(|| format!("Index {} out of range [0, {})", index, self.size))
    }

    fn get_ref(&self, index: usize) -> Option<&T> {
        if index >= self.size {
            return None;
        }
        let (chunk, offset) = self.locate(index);
        self.chunks.get(chunk).and_then(|c| c.get(offset))
    }

    fn set(&mut self, index: usize, value: T) -> Result<(), String> {
        if index >= self.size {
            return Err(format!("Index {} out of range [0, {})", index, self.size));
        }
        let (chunk, offset) = self.locate(index);
        self.chunks[chunk][offset] = value;
        Ok(())
    }

    fn append(&mut self, value: T) {
        let needs_chunk = self
            .chunks
            .last()
            .map(|c| c.len() == self.chunk_size)
            .unwrap_or(true);
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(self.chunk_size));
        }
        if let Some(last) = self.chunks.last_mut() {
            last.push(value);
        }
        self.size += 1;
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        Box::new(self.chunks.iter().flat_map(|c| c.iter()))
    }
}
